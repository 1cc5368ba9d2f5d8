use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::trace::{ParagraphUpdate, Trace, TraceId};

use super::{apply_update, ensure_valid, TraceStore};

/// One pretty-printed JSON file per trace under `<root>/traces/`.
#[derive(Debug)]
pub struct JsonDirTraceStore {
    traces_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirTraceStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let traces_dir = root.as_ref().join("traces");
        fs::create_dir_all(&traces_dir)?;
        Ok(Self {
            traces_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn traces_dir(&self) -> &Path {
        &self.traces_dir
    }

    /// `None` for ids that cannot name a file inside the traces directory.
    fn record_path(&self, trace_id: &TraceId) -> Option<PathBuf> {
        let safe = trace_id
            .as_str()
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        safe.then(|| self.traces_dir.join(format!("{}.json", trace_id.as_str())))
    }

    /// Writes the full record to a temp file beside the final one, so a record
    /// only becomes visible once it is complete.
    fn stage(&self, trace: &Trace) -> Result<NamedTempFile, StoreError> {
        let mut staged = NamedTempFile::new_in(&self.traces_dir)?;
        staged.write_all(serde_json::to_string_pretty(trace)?.as_bytes())?;
        staged.as_file().sync_all()?;
        Ok(staged)
    }

    fn read_record(&self, trace_id: &TraceId) -> Result<Trace, StoreError> {
        let path = self
            .record_path(trace_id)
            .ok_or_else(|| StoreError::NotFound(trace_id.clone()))?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(trace_id.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }
}

impl TraceStore for JsonDirTraceStore {
    fn create(&self, trace: &Trace) -> Result<(), StoreError> {
        ensure_valid(trace)?;
        let path = self.record_path(&trace.trace_id).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("trace id {} is not a valid file name", trace.trace_id),
            )
        })?;
        let staged = self.stage(trace)?;

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(trace.trace_id.clone()))
            }
            Err(err) => Err(err.error.into()),
        }
    }

    fn get(&self, trace_id: &TraceId) -> Result<Trace, StoreError> {
        self.read_record(trace_id)
    }

    fn update_paragraph(
        &self,
        trace_id: &TraceId,
        update: &ParagraphUpdate,
    ) -> Result<Trace, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let current = self.read_record(trace_id)?;
        let next = apply_update(&current, update)?;

        let path = self
            .record_path(trace_id)
            .ok_or_else(|| StoreError::NotFound(trace_id.clone()))?;
        self.stage(&next)?
            .persist(&path)
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::trace::{ConceptHop, EndingType, NewTrace, Relation, VectorDomain};

    fn paragraph(words: usize) -> String {
        vec!["lichen"; words].join(" ")
    }

    fn trace() -> Trace {
        Trace::create(NewTrace {
            object_label: "leaf".to_string(),
            vector_domain: VectorDomain::PlantAgency,
            concept_path: vec![
                ConceptHop::new("leaf", Relation::IsA),
                ConceptHop::new("chlorophyll lattice", Relation::MadeOf),
            ],
            paragraph_text: paragraph(270),
            ending_type: EndingType::Open,
            safety_flag: false,
            dark_flag: false,
        })
        .unwrap_or_else(|violations| panic!("fixture invalid: {violations:?}"))
    }

    fn record_files(store: &JsonDirTraceStore) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(store.traces_dir())? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    #[test]
    fn create_writes_pretty_record_and_reads_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        let trace = trace();
        store.create(&trace)?;

        let path = store
            .traces_dir()
            .join(format!("{}.json", trace.trace_id.as_str()));
        let raw = fs::read_to_string(&path)?;
        assert!(raw.contains("\n  \"trace_id\""));
        let value: Value = serde_json::from_str(&raw)?;
        assert_eq!(value["vector_domain"], Value::String("PLANT_AGENCY".to_string()));

        assert_eq!(store.get(&trace.trace_id)?, trace);
        Ok(())
    }

    #[test]
    fn records_survive_reopening() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let trace = trace();
        JsonDirTraceStore::open(temp.path())?.create(&trace)?;

        let reopened = JsonDirTraceStore::open(temp.path())?;
        assert_eq!(reopened.get(&trace.trace_id)?, trace);
        Ok(())
    }

    #[test]
    fn duplicate_create_is_rejected_and_original_kept() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        let trace = trace();
        store.create(&trace)?;

        let mut clash = trace.clone();
        clash.object_label = "impostor".to_string();
        assert!(matches!(
            store.create(&clash),
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.get(&trace.trace_id)?.object_label, "leaf");
        assert_eq!(record_files(&store)?, vec![format!("{}.json", trace.trace_id)]);
        Ok(())
    }

    #[test]
    fn unknown_and_path_like_ids_are_not_found() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        assert!(matches!(
            store.get(&TraceId::generate()),
            Err(StoreError::NotFound(_))
        ));
        let escape = TraceId::parse("../secrets").unwrap_or_else(TraceId::generate);
        assert!(matches!(store.get(&escape), Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn update_replaces_file_atomically() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        let trace = trace();
        store.create(&trace)?;

        let update = ParagraphUpdate {
            paragraph_text: paragraph(310),
            concept_path_delta: vec![ConceptHop::new("root network", Relation::EmbeddedIn)],
            ending_type: EndingType::Resolved,
            safety_flag: false,
            dark_flag: false,
        };
        let updated = store.update_paragraph(&trace.trace_id, &update)?;
        assert_eq!(updated.depth(), 3);
        assert_eq!(store.get(&trace.trace_id)?, updated);

        assert_eq!(record_files(&store)?, vec![format!("{}.json", trace.trace_id)]);
        Ok(())
    }

    #[test]
    fn invalid_update_keeps_previous_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        let trace = trace();
        store.create(&trace)?;

        let update = ParagraphUpdate {
            paragraph_text: paragraph(20),
            concept_path_delta: vec![ConceptHop::new("spore", Relation::Feeds)],
            ending_type: EndingType::Open,
            safety_flag: false,
            dark_flag: false,
        };
        assert!(matches!(
            store.update_paragraph(&trace.trace_id, &update),
            Err(StoreError::InvalidParagraph(_))
        ));
        assert_eq!(store.get(&trace.trace_id)?, trace);
        Ok(())
    }

    #[test]
    fn abandoned_staging_files_are_invisible() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        let trace = trace();

        // A create that died before publishing leaves only a staging file.
        let abandoned = store.stage(&trace)?;
        let (_file, staged_path) = abandoned.keep()?;
        fs::write(&staged_path, "")?;
        assert!(matches!(
            store.get(&trace.trace_id),
            Err(StoreError::NotFound(_))
        ));

        store.create(&trace)?;
        assert_eq!(store.get(&trace.trace_id)?, trace);
        Ok(())
    }

    #[test]
    fn corrupt_record_surfaces_as_corrupt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonDirTraceStore::open(temp.path())?;
        let id = TraceId::generate();
        fs::write(
            store.traces_dir().join(format!("{}.json", id.as_str())),
            "{not json",
        )?;
        assert!(matches!(store.get(&id), Err(StoreError::Corrupt(_))));
        Ok(())
    }
}
