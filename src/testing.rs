//! In-tree provider fixtures. These exist purely so this crate's own test
//! suite and doctests have something concrete to register against; they are
//! not a provider SDK and ship no real cloud integration.

use alchemy_domain::Phase;
use alchemy_scope::LifecycleContext;
use serde_json::Value;

use crate::error::AlchemyError;

pub const ECHO_KIND: &str = "test::Echo";
pub const FS_ECHO_KIND: &str = "test::FsEcho";

/// Returns its props back unchanged as output on create/update, `null` on
/// delete. No side effects of any kind.
pub fn register_echo_provider() -> Result<(), AlchemyError> {
    crate::register_provider(ECHO_KIND, false, |ctx: LifecycleContext, props: Value| async move {
        match ctx.phase {
            Phase::Delete => Ok(Value::Null),
            _ => Ok(props),
        }
    })
}

/// Writes `props.content` to the file at `props.path` on create/update,
/// removes it on delete. Lets a test observe a provider's side effect
/// outside of its returned output.
pub fn register_fs_echo_provider() -> Result<(), AlchemyError> {
    crate::register_provider(FS_ECHO_KIND, false, |ctx: LifecycleContext, props: Value| async move {
        match ctx.phase {
            Phase::Delete => {
                if let Some(path) = ctx.prev_props.as_ref().and_then(|p| p.get("path")).and_then(|v| v.as_str()) {
                    let _ = std::fs::remove_file(path);
                }
                Ok(Value::Null)
            }
            _ => {
                let path = props
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "test::FsEcho requires a string 'path' prop".to_string())?;
                let content = props.get("content").and_then(|v| v.as_str()).unwrap_or("");
                std::fs::write(path, content).map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "path": path, "bytes_written": content.len() }))
            }
        }
    })
}
