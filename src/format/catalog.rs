//! Ordered collection of candidate message formats.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MessageFormat, MessageFormatRecord};
use crate::{ReplayError, Result};

/// YAML document shape accepted by [`FormatCatalog::from_yaml_str`].
///
/// ```yaml
/// formats:
///   - name: nav
///     sync_bytes: ["0xAA", "0x55"]
///     end_bytes: ["0x0D", "0x0A"]
///     message_size: 64
///     timestamp_byte_offset: 4
///     timestamp_size: 4
///     timestamp_scaling: "10^3"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub formats: Vec<MessageFormatRecord>,
}

/// Candidate formats in match priority order.
///
/// Formats are held behind [`Arc`] so a matched stream keeps its format alive
/// even if the catalog is edited afterwards.
#[derive(Debug, Clone, Default)]
pub struct FormatCatalog {
    formats: Vec<Arc<MessageFormat>>,
}

impl FormatCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from YAML text.
    ///
    /// Every record is validated and duplicates are rejected, exactly as if
    /// they had been added one by one.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let document: CatalogDocument = serde_yaml_ng::from_str(yaml)?;
        Self::from_records(document.formats)
    }

    /// Read and parse a catalog YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ReplayError::file_error(path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_records(records: impl IntoIterator<Item = MessageFormatRecord>) -> Result<Self> {
        let mut catalog = Self::new();
        for record in records {
            catalog.add(record.build()?)?;
        }
        Ok(catalog)
    }

    /// Append a format to the end of the priority order.
    ///
    /// # Errors
    ///
    /// [`ReplayError::DuplicateFormat`] if a format with the same name, or
    /// with an identical layout under another name, is already present.
    pub fn add(&mut self, format: MessageFormat) -> Result<Arc<MessageFormat>> {
        if let Some(existing) = self
            .formats
            .iter()
            .find(|f| f.name() == format.name() || f.same_layout(&format))
        {
            return Err(ReplayError::DuplicateFormat { name: existing.name().to_string() });
        }

        debug!("Added message format '{}' ({} byte frames)", format.name(), format.message_size());
        let format = Arc::new(format);
        self.formats.push(Arc::clone(&format));
        Ok(format)
    }

    /// Remove a format by name, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Arc<MessageFormat>> {
        let position = self.formats.iter().position(|f| f.name() == name)?;
        Some(self.formats.remove(position))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<MessageFormat>> {
        self.formats.iter().find(|f| f.name() == name)
    }

    /// Formats in priority order.
    pub fn formats(&self) -> &[Arc<MessageFormat>] {
        &self.formats
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Records for every format, in priority order.
    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument { formats: self.formats.iter().map(|f| f.to_record()).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, ensure};

    const CATALOG: &str = r#"
formats:
  - name: nav
    sync_bytes: ["0xAA", "0x55"]
    end_bytes: ["0x0D", "0x0A"]
    message_size: 16
    timestamp_byte_offset: 4
    timestamp_size: 4
  - name: imu
    sync_bytes: [126, 126, 1]
    end_bytes: [255]
    message_size: 32
    timestamp_byte_offset: 8
    timestamp_size: 8
    timestamp_scaling: "10^6"
    byte_order: little
"#;

    #[test]
    fn loads_formats_in_document_order() -> anyhow::Result<()> {
        let catalog = FormatCatalog::from_yaml_str(CATALOG).context("catalog should parse")?;
        ensure!(catalog.len() == 2);
        let names: Vec<_> = catalog.formats().iter().map(|f| f.name().to_string()).collect();
        ensure!(names == ["nav", "imu"], "unexpected order {names:?}");

        let imu = catalog.get("imu").context("imu present")?;
        ensure!(imu.timestamp_scaling() == 1_000_000.0);
        ensure!(imu.sync_bytes() == [126, 126, 1, 0]);
        Ok(())
    }

    #[test]
    fn rejects_duplicate_names_and_layouts() {
        let mut catalog = FormatCatalog::from_yaml_str(CATALOG).unwrap();

        let same_name = MessageFormatRecord::new("nav", 20).sync(&[1, 2]).end(&[3]).build().unwrap();
        assert!(matches!(
            catalog.add(same_name),
            Err(ReplayError::DuplicateFormat { name }) if name == "nav"
        ));

        let mut renamed = catalog.get("nav").unwrap().to_record();
        renamed.name = "nav-copy".to_string();
        assert!(matches!(
            catalog.add(renamed.build().unwrap()),
            Err(ReplayError::DuplicateFormat { name }) if name == "nav"
        ));

        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn invalid_records_fail_the_whole_load() {
        let yaml = r#"
formats:
  - name: broken
    sync_bytes: [0, 85]
    end_bytes: [13]
    message_size: 16
    timestamp_byte_offset: 4
    timestamp_size: 4
"#;
        assert!(matches!(
            FormatCatalog::from_yaml_str(yaml),
            Err(ReplayError::InvalidFormat { .. })
        ));
        assert!(matches!(
            FormatCatalog::from_yaml_str("formats: [unterminated"),
            Err(ReplayError::Config { .. })
        ));
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut catalog = FormatCatalog::from_yaml_str(CATALOG).unwrap();
        let removed = catalog.remove("nav").expect("nav present");
        assert_eq!(removed.name(), "nav");
        assert!(catalog.remove("nav").is_none());
        assert_eq!(catalog.formats()[0].name(), "imu");
        assert_eq!(catalog.to_document().formats.len(), 1);
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = FormatCatalog::from_path("/definitely/not/here.yaml").unwrap_err();
        match err {
            ReplayError::File { path, .. } => assert!(path.ends_with("here.yaml")),
            other => panic!("Expected File error, got {other:?}"),
        }
    }
}
