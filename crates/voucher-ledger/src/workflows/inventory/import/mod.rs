mod classification;
mod normalizer;
mod parser;

pub use classification::ClassificationRule;

use crate::workflows::domain::{NewResource, ServiceCode, ServiceKey};
use crate::workflows::store::{LedgerStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Every variant aborts the whole batch; nothing is persisted.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("import failed: unable to read inventory file: {0}")]
    Io(#[from] std::io::Error),
    #[error("import failed: invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("import failed: the file has no header row")]
    MissingHeader,
    #[error("import failed: missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("import failed: line {line}: '{value}' in column '{column}' is not a recognised date")]
    InvalidDate {
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("import failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub key: ServiceKey,
    pub imported: usize,
    pub duplicates_in_file: usize,
    pub already_present: usize,
    pub by_service_code: BTreeMap<ServiceCode, usize>,
}

impl ImportSummary {
    pub fn message(&self) -> String {
        format!(
            "imported {} new {} resource(s); skipped {} duplicate row(s) and {} already known code(s)",
            self.imported, self.key, self.duplicates_in_file, self.already_present
        )
    }
}

/// Bulk-loads resource codes for one provider from a CSV export.
#[derive(Debug, Clone)]
pub struct InventoryImporter {
    key: ServiceKey,
    classification: ClassificationRule,
}

impl InventoryImporter {
    pub fn new(key: ServiceKey, classification: ClassificationRule) -> Self {
        Self {
            key,
            classification,
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn import_path<P: AsRef<Path>>(
        &self,
        store: &LedgerStore,
        path: P,
    ) -> Result<ImportSummary, ImportError> {
        let file = std::fs::File::open(path)?;
        self.import_reader(store, file)
    }

    /// Parses the whole file, drops codes already seen in this file or in the store, and
    /// commits the remaining rows as a single batch.
    pub fn import_reader<R: Read>(
        &self,
        store: &LedgerStore,
        reader: R,
    ) -> Result<ImportSummary, ImportError> {
        let rows = parser::parse_rows(reader)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut summary = ImportSummary {
            key: self.key.clone(),
            imported: 0,
            duplicates_in_file: 0,
            already_present: 0,
            by_service_code: BTreeMap::new(),
        };
        let mut batch = Vec::new();

        for row in rows {
            if !seen.insert(row.code.clone()) {
                summary.duplicates_in_file += 1;
                continue;
            }
            if store.contains_code(&self.key.provider, &row.code)? {
                summary.already_present += 1;
                continue;
            }

            let service_code = self
                .classification
                .classify(&row.code)
                .unwrap_or(self.key.service_code);
            *summary.by_service_code.entry(service_code).or_default() += 1;
            batch.push(NewResource {
                provider: self.key.provider.clone(),
                service_code,
                code: row.code,
                status: row.status,
                sent_at: row.sent_at,
                expires_at: row.expires_at,
            });
        }

        summary.imported = batch.len();
        if batch.is_empty() {
            debug!(key = %self.key, "import contained no new resources");
            return Ok(summary);
        }

        let mut tx = store.begin();
        for resource in batch {
            tx.insert_resource(resource);
        }
        tx.commit()?;

        info!(
            key = %self.key,
            imported = summary.imported,
            duplicates = summary.duplicates_in_file,
            already_present = summary.already_present,
            "inventory import committed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::domain::{ProviderId, ResourceStatus};
    use std::io::Cursor;

    const HEADER: &str = "Coupon Code,Expiration Date,Date Sent,Coupon Status\n";

    fn importer() -> InventoryImporter {
        InventoryImporter::new(
            ServiceKey::new("accredit", ServiceCode::Proctored),
            ClassificationRule::new(&[
                ("ACC", ServiceCode::Proctored),
                ("NONP", ServiceCode::NonProctored),
            ]),
        )
    }

    fn provider() -> ProviderId {
        ProviderId::new("accredit")
    }

    #[test]
    fn in_file_duplicates_persist_once() {
        let store = LedgerStore::new();
        let csv = format!("{HEADER}ACC1,2026/01/01 00:00,,available\nACC1,2026/02/01 00:00,,sent\n");

        let summary = importer()
            .import_reader(&store, Cursor::new(csv))
            .expect("import succeeds");

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.duplicates_in_file, 1);
        let stored = store
            .resource_by_code(&provider(), "ACC1")
            .unwrap()
            .expect("persisted");
        assert_eq!(stored.status, ResourceStatus::Available);
    }

    #[test]
    fn reimporting_the_same_file_adds_nothing() {
        let store = LedgerStore::new();
        let csv = format!("{HEADER}ACC1,,,\nACC2,,,\n");

        importer()
            .import_reader(&store, Cursor::new(csv.clone()))
            .expect("first import");
        let again = importer()
            .import_reader(&store, Cursor::new(csv))
            .expect("second import");

        assert_eq!(again.imported, 0);
        assert_eq!(again.already_present, 2);
        assert_eq!(store.available_count(&provider(), None).unwrap(), 2);
    }

    #[test]
    fn prefixes_decide_the_service_code() {
        let store = LedgerStore::new();
        let csv = format!("{HEADER}ACC1,,,\nNONP1,,,\n");

        let summary = importer()
            .import_reader(&store, Cursor::new(csv))
            .expect("import succeeds");

        assert_eq!(summary.by_service_code.get(&ServiceCode::Proctored), Some(&1));
        assert_eq!(
            summary.by_service_code.get(&ServiceCode::NonProctored),
            Some(&1)
        );
        let nonp = store
            .resource_by_code(&provider(), "NONP1")
            .unwrap()
            .expect("persisted");
        assert_eq!(nonp.service_code, ServiceCode::NonProctored);
    }

    #[test]
    fn unparseable_date_aborts_the_whole_batch() {
        let store = LedgerStore::new();
        let csv = format!("{HEADER}ACC1,2026/01/01 00:00,,\nACC2,01-02-2026,,\n");

        match importer().import_reader(&store, Cursor::new(csv)) {
            Err(ImportError::InvalidDate { column, value, .. }) => {
                assert_eq!(column, "expiration date");
                assert_eq!(value, "01-02-2026");
            }
            other => panic!("expected invalid date, got {other:?}"),
        }
        assert!(!store.contains_code(&provider(), "ACC1").unwrap());
    }

    #[test]
    fn import_path_propagates_io_errors() {
        let store = LedgerStore::new();
        match importer().import_path(&store, "./does-not-exist.csv") {
            Err(ImportError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
