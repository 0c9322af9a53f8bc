use super::transaction::Transaction;
use crate::collection::{CollectionRegistry, EntityCollection, EntityId};
use crate::common::{STATE_FINISHED, TX_STATE};
use crate::errors::{MagoError, MagoResult};
use crate::filter::field;

/// Outcome of one recovery pass.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Records already finished, deleted without replay
    pub discarded: usize,
    /// Records driven forward to finished
    pub recovered: Vec<EntityId>,
    /// Records that could not be read or replayed, with the reason
    pub failed: Vec<(String, MagoError)>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Scans the transaction collection and settles every record left behind by
/// an interrupted commit.
///
/// Finished records are deleted first. Every other record is rebuilt into a
/// [`Transaction`] and driven forward to `finished`. A record that fails is
/// logged and reported; the scan moves on to the next one so a single bad
/// record cannot block the rest.
pub struct RecoveryScanner {
    log: EntityCollection,
    registry: CollectionRegistry,
}

impl RecoveryScanner {
    pub fn new(log: EntityCollection, registry: CollectionRegistry) -> Self {
        RecoveryScanner { log, registry }
    }

    pub fn run(&self) -> MagoResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let finished = self.log.stored_documents(&field(TX_STATE).eq(STATE_FINISHED))?;
        for record in finished {
            if let Some(id) = record.id() {
                self.log.delete(&id)?;
                report.discarded += 1;
            }
        }

        for record in self.log.stored_documents(&field(TX_STATE).ne(STATE_FINISHED))? {
            let label = record
                .id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<no id>".to_string());

            let result = Transaction::from_record(&record, self.log.clone(), self.registry.clone())
                .and_then(|tx| tx.recover().map(|_| tx.id()));
            match result {
                Ok(id) => report.recovered.push(id),
                Err(e) => {
                    log::error!("Failed to recover transaction {}: {}", label, e);
                    report.failed.push((label, e));
                }
            }
        }

        log::info!(
            "Recovery finished: {} discarded, {} recovered, {} failed",
            report.discarded,
            report.recovered.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
