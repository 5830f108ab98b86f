use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::anyhow;

use nexuscrm_core::{EntityId, ModuleKind};
use nexuscrm_infra::{TransactionError, TransactionManager, TxId};

use crate::collaborators::{
    EntityReader, EntityRecord, ForeignKey, ModuleWriter, StepOutcome, WriteStep,
};

type RecordKey = (ModuleKind, EntityId);

#[derive(Debug, Clone)]
enum StepFault {
    Error(String),
    Reject(String),
}

/// In-memory module storage with staged, per-transaction writes.
///
/// Intended for tests/dev. Writes are invisible to readers until their
/// transaction commits; a rollback discards them. Faults can be injected per step
/// name to exercise failure paths.
#[derive(Debug, Default)]
pub struct InMemoryModuleStore {
    committed: RwLock<BTreeMap<RecordKey, EntityRecord>>,
    staged: Mutex<HashMap<TxId, Vec<EntityRecord>>>,
    faults: Mutex<HashMap<String, StepFault>>,
    unreadable: Mutex<HashSet<ModuleKind>>,
}

impl InMemoryModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` as committed, replacing any previous version.
    pub fn insert(&self, record: EntityRecord) {
        self.committed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((record.module, record.id), record);
    }

    /// Committed records of `module`, in id order.
    pub fn records(&self, module: ModuleKind) -> Vec<EntityRecord> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.module == module)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.committed.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open_transactions(&self) -> usize {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Make writes for `step` return an error (aborting the flow).
    pub fn fail_on(&self, step: &str) {
        self.set_fault(step, StepFault::Error(format!("{step} write failed")));
    }

    /// Make writes for `step` report `success: false` with `reason`.
    pub fn reject_on(&self, step: &str, reason: &str) {
        self.set_fault(step, StepFault::Reject(reason.to_string()));
    }

    /// Make every read of `module` fail.
    pub fn fail_reads_of(&self, module: ModuleKind) {
        self.unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn set_fault(&self, step: &str, fault: StepFault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(step.to_string(), fault);
    }

    fn check_readable(&self, module: ModuleKind) -> anyhow::Result<()> {
        if self
            .unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&module)
        {
            return Err(anyhow!("{module} storage unavailable"));
        }
        Ok(())
    }
}

impl TransactionManager for InMemoryModuleStore {
    fn begin(&self) -> Result<TxId, TransactionError> {
        let tx = TxId::new();
        self.staged
            .lock()
            .map_err(|_| TransactionError::Poisoned)?
            .insert(tx, Vec::new());
        Ok(tx)
    }

    fn commit(&self, tx: &TxId) -> Result<(), TransactionError> {
        let writes = self
            .staged
            .lock()
            .map_err(|_| TransactionError::Poisoned)?
            .remove(tx)
            .ok_or(TransactionError::UnknownTransaction(*tx))?;

        let mut committed = self.committed.write().map_err(|_| TransactionError::Poisoned)?;
        for record in writes {
            committed.insert((record.module, record.id), record);
        }
        Ok(())
    }

    fn rollback(&self, tx: &TxId) -> Result<(), TransactionError> {
        self.staged
            .lock()
            .map_err(|_| TransactionError::Poisoned)?
            .remove(tx)
            .map(|_| ())
            .ok_or(TransactionError::UnknownTransaction(*tx))
    }
}

impl ModuleWriter for InMemoryModuleStore {
    fn write(&self, tx: &TxId, step: &WriteStep) -> anyhow::Result<StepOutcome> {
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(step.name)
            .cloned();
        match fault {
            Some(StepFault::Error(message)) => return Err(anyhow!(message)),
            Some(StepFault::Reject(reason)) => return Ok(StepOutcome::failed(reason)),
            None => {}
        }

        let id = step.entity_id.unwrap_or_default();
        let key = (step.module, id);

        let mut staged = self
            .staged
            .lock()
            .map_err(|_| anyhow!(TransactionError::Poisoned))?;
        let writes = staged
            .get_mut(tx)
            .ok_or_else(|| anyhow!(TransactionError::UnknownTransaction(*tx)))?;

        // Upsert over the newest visible version: this transaction's, else committed.
        let base = match writes.iter().rev().find(|r| (r.module, r.id) == key) {
            Some(r) => Some(r.clone()),
            None => self
                .committed
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned(),
        };

        let mut record = base.unwrap_or_else(|| EntityRecord {
            id,
            module: step.module,
            user_id: None,
            project_id: None,
            lead_id: None,
            attributes: serde_json::Map::new(),
        });
        record.user_id = step.user_id.or(record.user_id);
        record.project_id = step.project_id.or(record.project_id);
        record.lead_id = step.lead_id.or(record.lead_id);
        record
            .attributes
            .extend(step.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));

        writes.push(record);
        Ok(StepOutcome::ok()
            .with("id", id.to_string())
            .with("module", step.module.as_str()))
    }
}

impl EntityReader for InMemoryModuleStore {
    fn get_by_id(&self, module: ModuleKind, id: EntityId) -> anyhow::Result<Option<EntityRecord>> {
        self.check_readable(module)?;
        Ok(self
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(module, id))
            .cloned())
    }

    fn list_by(&self, module: ModuleKind, key: ForeignKey) -> anyhow::Result<Vec<EntityRecord>> {
        self.check_readable(module)?;
        Ok(self
            .records(module)
            .into_iter()
            .filter(|r| key.matches(r))
            .collect())
    }
}
