//! Host list file
//!
//! One host per line. Lines starting with `#` are disabled, blank lines are
//! ignored, and the remaining order is the fleet order.

use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::filesys::file::File;

/// Ordered, duplicate-free list of enabled hosts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostList {
    hosts: Vec<String>,
}

impl HostList {
    pub fn parse(content: &str) -> Self {
        let mut hosts: Vec<String> = Vec::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if hosts.iter().any(|h| h == line) {
                warn!("Host {} listed twice: keeping the first entry", line);
                continue;
            }
            hosts.push(line.to_string());
        }
        Self { hosts }
    }

    pub async fn load(file: &File) -> Result<Self, ControllerError> {
        if !file.exists().await {
            return Err(ControllerError::ConfigError(format!(
                "Host list not found: {}",
                file.path().display()
            )));
        }
        let list = Self::parse(&file.read_string().await?);
        debug!("Loaded {} hosts from {:?}", list.len(), file.path());
        Ok(list)
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_blanks_are_skipped() {
        let list = HostList::parse("dev1\n#dev2\n\n  dev3  \r\n# spare\n");
        assert_eq!(list.hosts(), ["dev1", "dev3"]);
    }

    #[test]
    fn test_duplicates_keep_first_position() {
        let list = HostList::parse("dev3\ndev1\ndev3\n");
        assert_eq!(list.hosts(), ["dev3", "dev1"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = HostList::load(&File::new(dir.path().join("hosts.txt"))).await;
        assert!(matches!(result, Err(ControllerError::ConfigError(_))));
    }
}
