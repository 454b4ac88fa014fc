use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IntakePaths {
    pub intake_home: PathBuf,
    pub state_dir: PathBuf,
    pub blobs_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub inbound_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub keys_dir: PathBuf,
}

impl IntakePaths {
    /// Layout rooted at `home` with no environment overrides.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let intake_home = home.into();
        Self {
            state_dir: intake_home.join("state"),
            blobs_dir: intake_home.join("blobs"),
            staging_dir: intake_home.join("staging"),
            inbound_dir: intake_home.join("inbound"),
            outbox_dir: intake_home.join("outbox"),
            logs_dir: intake_home.join("logs"),
            keys_dir: intake_home.join("keys"),
            intake_home,
        }
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.inbound_dir.join("processed")
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.inbound_dir.join("failed")
    }

    pub fn master_key_file(&self) -> PathBuf {
        self.keys_dir.join("master.key")
    }

    pub fn watch_lock_file(&self) -> PathBuf {
        self.state_dir.join("watch.daemon.lock")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<IntakePaths> {
    let intake_home = match env::var("INTAKE_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".dossier-intake"),
    };
    let base = IntakePaths::under(&intake_home);

    Ok(IntakePaths {
        state_dir: env_or_default_path("INTAKE_STATE_DIR", base.state_dir),
        blobs_dir: env_or_default_path("INTAKE_BLOBS_DIR", base.blobs_dir),
        staging_dir: env_or_default_path("INTAKE_STAGING_DIR", base.staging_dir),
        inbound_dir: env_or_default_path("INTAKE_INBOUND_DIR", base.inbound_dir),
        outbox_dir: env_or_default_path("INTAKE_OUTBOX_DIR", base.outbox_dir),
        logs_dir: env_or_default_path("INTAKE_LOGS_DIR", base.logs_dir),
        keys_dir: env_or_default_path("INTAKE_KEYS_DIR", base.keys_dir),
        intake_home,
    })
}
