use std::path::{Path, PathBuf};

use skiff_core::task::Task;
use skiff_core::CoreError;

/// The sandbox tree on the target filesystem:
/// `<root>/<session>/` holds session-wide data, `<session>/<pilot>/`
/// the pilot, and one directory per task underneath that. Staging URLs
/// (`client://`, `session://`, `pilot://`, `task://`) resolve against it.
#[derive(Debug, Clone)]
pub struct Sandboxes {
    pub client: PathBuf,
    pub session: PathBuf,
    pub pilot: PathBuf,
}

impl Sandboxes {
    pub fn create(root: &Path, session_id: &str, pilot_id: &str) -> Result<Self, CoreError> {
        let client = root.to_path_buf();
        let session = root.join(session_id);
        let pilot = session.join(pilot_id);
        std::fs::create_dir_all(&pilot)?;
        Ok(Self {
            client,
            session,
            pilot,
        })
    }

    /// The task's sandbox directory (not created here; staging-input
    /// owns creation so it can batch mkdirs).
    pub fn task_sandbox(&self, task: &Task) -> PathBuf {
        match &task.description.sandbox {
            Some(name) if Path::new(name).is_absolute() => PathBuf::from(name),
            Some(name) => self.pilot.join(name),
            None => self.pilot.join(&task.uid),
        }
    }

    /// Resolve a staging URL. Unknown schemes are an error; plain
    /// relative paths resolve against the task sandbox.
    pub fn resolve(&self, url: &str, task_sandbox: &Path) -> Result<PathBuf, CoreError> {
        if let Some((scheme, rest)) = url.split_once("://") {
            let rest = rest.trim_start_matches('/');
            let base = match scheme {
                "client" => &self.client,
                "session" => &self.session,
                "pilot" => &self.pilot,
                "task" => return Ok(task_sandbox.join(rest)),
                other => {
                    return Err(CoreError::Staging {
                        directive: url.into(),
                        reason: format!("unsupported URL scheme `{other}`"),
                    })
                }
            };
            return Ok(base.join(rest));
        }
        let path = Path::new(url);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(task_sandbox.join(path))
        }
    }

    /// Environment advertising the sandbox locations to task scripts.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("SKIFF_CLIENT_SANDBOX".into(), self.client.display().to_string()),
            ("SKIFF_SESSION_SANDBOX".into(), self.session.display().to_string()),
            ("SKIFF_PILOT_SANDBOX".into(), self.pilot.display().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::task::TaskDescription;

    fn sandboxes() -> (tempfile::TempDir, Sandboxes) {
        let dir = tempfile::tempdir().unwrap();
        let sb = Sandboxes::create(dir.path(), "session.0001", "pilot.0000").unwrap();
        (dir, sb)
    }

    #[test]
    fn tree_is_created_nested() {
        let (_dir, sb) = sandboxes();
        assert!(sb.pilot.is_dir());
        assert!(sb.pilot.starts_with(&sb.session));
    }

    #[test]
    fn task_sandbox_defaults_to_uid() {
        let (_dir, sb) = sandboxes();
        let task = Task::new("task.0000", TaskDescription::default());
        assert_eq!(sb.task_sandbox(&task), sb.pilot.join("task.0000"));
    }

    #[test]
    fn sandbox_override_is_honored() {
        let (_dir, sb) = sandboxes();
        let task = Task::new(
            "task.0001",
            TaskDescription {
                sandbox: Some("shared".into()),
                ..Default::default()
            },
        );
        assert_eq!(sb.task_sandbox(&task), sb.pilot.join("shared"));
    }

    #[test]
    fn url_schemes_resolve_against_the_tree() {
        let (_dir, sb) = sandboxes();
        let task_sb = sb.pilot.join("task.0000");
        assert_eq!(
            sb.resolve("pilot:///data/in.dat", &task_sb).unwrap(),
            sb.pilot.join("data/in.dat")
        );
        assert_eq!(
            sb.resolve("session:///x", &task_sb).unwrap(),
            sb.session.join("x")
        );
        assert_eq!(
            sb.resolve("task:///out.txt", &task_sb).unwrap(),
            task_sb.join("out.txt")
        );
        assert_eq!(sb.resolve("in.dat", &task_sb).unwrap(), task_sb.join("in.dat"));
        assert!(sb.resolve("ftp://x/y", &task_sb).is_err());
    }
}
