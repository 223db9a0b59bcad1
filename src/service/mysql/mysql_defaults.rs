use ini::Ini;
use tempfile::NamedTempFile;

/// The `[client]` section handed to mysqldump through `--defaults-file`,
/// keeping credentials off the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlDefaults {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl MySqlDefaults {
    pub fn to_ini(&self) -> Ini {
        let mut conf = Ini::new();
        conf.with_section(Some("client"))
            .set("host", self.host.as_str())
            .set("port", self.port.to_string())
            .set("user", self.user.as_str())
            .set("password", self.password.as_str());
        conf
    }

    /// Writes the defaults to a temporary file that is deleted on drop.
    pub fn write_temp(&self) -> Result<NamedTempFile, std::io::Error> {
        let file = NamedTempFile::new()?;
        self.to_ini().write_to_file(file.path())?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> MySqlDefaults {
        MySqlDefaults {
            host: "127.0.0.1".to_string(),
            port: 3307,
            user: "backup".to_string(),
            password: "s3cr3t-pass".to_string(),
        }
    }

    #[test]
    fn test_write_temp_defaults() {
        let file = defaults().write_temp().unwrap();

        let conf = Ini::load_from_file(file.path()).unwrap();
        let client = conf.section(Some("client")).unwrap();
        assert_eq!(client.get("host"), Some("127.0.0.1"));
        assert_eq!(client.get("port"), Some("3307"));
        assert_eq!(client.get("user"), Some("backup"));
        assert_eq!(client.get("password"), Some("s3cr3t-pass"));
    }

    #[test]
    fn test_only_client_section() {
        let conf = defaults().to_ini();
        let sections: Vec<_> = conf.sections().flatten().collect();
        assert_eq!(sections, ["client"]);
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let file = defaults().write_temp().unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }
}
