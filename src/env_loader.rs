use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(
    intake_home: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    match intake_home {
        Some(home) => Some(home.join(".env")),
        None => Some(home_dir?.join(".dossier-intake/.env")),
    }
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("INTAKE_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_reads_env_file_at_intake_home_root() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/intake")),
            Some(PathBuf::from("/home/alice")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/intake/.env")));
    }

    #[test]
    fn fallback_uses_default_home_layout_when_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        assert_eq!(got, Some(PathBuf::from("/home/alice/.dossier-intake/.env")));
    }

    #[test]
    fn no_home_means_no_fallback() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
