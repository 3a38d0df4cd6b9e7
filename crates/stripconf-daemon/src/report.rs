//! Cache summary reporting

use serde::Serialize;
use std::collections::BTreeMap;
use stripconf_core::{ClassifiedFailure, ConfigDb};

/// Counts of every cached category after a refresh
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub partition: String,
    pub version: String,
    pub mode: String,
    pub available: bool,
    pub devices: usize,
    pub device_types: BTreeMap<String, usize>,
    pub fed_descriptions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fed_ids: Option<Vec<u16>>,
    pub fed_connections: usize,
    pub pia_resets: usize,
    pub dcu_det_ids: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<ClassifiedFailure>,
}

impl Summary {
    /// Reload every cache and count the results
    pub fn collect(db: &mut ConfigDb, with_fed_ids: bool) -> Self {
        db.update_local_caches();

        let device_summary = db.device_summary();
        let device_types = device_summary
            .counts
            .iter()
            .map(|(device_type, count)| (device_type.as_str().to_string(), *count))
            .collect();

        Self {
            partition: db.partition().name.clone(),
            version: db.partition().version().to_string(),
            mode: db.mode().to_string(),
            available: db.is_available(),
            devices: device_summary.total,
            device_types,
            fed_descriptions: db.fed_descriptions().len(),
            fed_ids: with_fed_ids.then(|| db.fed_ids()),
            fed_connections: db.fed_connections().len(),
            pia_resets: db.pia_reset_descriptions().len(),
            dcu_det_ids: db.dcu_det_id_map().len(),
            last_failure: db.last_failure().cloned(),
        }
    }

    pub fn print_text(&self) {
        println!(
            "Partition {} (version {}) via {}",
            self.partition, self.version, self.mode
        );
        if !self.available {
            println!("  Backend unavailable; all caches empty");
        }
        println!("  Devices:           {}", self.devices);
        for (device_type, count) in &self.device_types {
            println!("    {:<12} {}", device_type, count);
        }
        println!("  FED descriptions:  {}", self.fed_descriptions);
        if let Some(ids) = &self.fed_ids {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            println!("    FED ids: {}", ids.join(", "));
        }
        println!("  FED connections:   {}", self.fed_connections);
        println!("  PIA resets:        {}", self.pia_resets);
        println!("  DCU-DetId entries: {}", self.dcu_det_ids);
        if let Some(failure) = &self.last_failure {
            println!("  Last failure: {}", failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripconf_core::DbCredentials;

    #[test]
    fn test_unavailable_backend_reports_empty() {
        let mut db = ConfigDb::using_database(DbCredentials::default(), None);
        assert!(db.open_connection().is_err());

        let summary = Summary::collect(&mut db, true);
        assert!(!summary.available);
        assert_eq!(summary.devices, 0);
        assert_eq!(summary.fed_ids, Some(Vec::new()));
        assert_eq!(summary.mode, "database");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["fed_connections"], 0);
        assert!(json.get("last_failure").is_none());
    }
}
