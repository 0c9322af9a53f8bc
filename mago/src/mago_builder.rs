use crate::errors::{MagoError, MagoResult};
use crate::mago::Mago;
use crate::mago_config::MagoConfig;
use crate::store::DocumentStoreProvider;

/// Fluent builder for a [`Mago`] instance.
///
/// The first configuration error is kept and returned from [`MagoBuilder::open`];
/// later settings are skipped once an error was captured.
///
/// ```rust,ignore
/// let db = Mago::builder()
///     .store(InMemoryStore::new())
///     .transaction_collection("tx_log")
///     .recover_on_open(true)
///     .open()?;
/// ```
#[derive(Default)]
pub struct MagoBuilder {
    error: Option<MagoError>,
    config: MagoConfig,
}

impl MagoBuilder {
    pub fn new() -> Self {
        MagoBuilder {
            error: None,
            config: MagoConfig::new(),
        }
    }

    pub fn store<T: DocumentStoreProvider + 'static>(mut self, store: T) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_store(store) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn transaction_collection(mut self, name: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_transaction_collection(name) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn recover_on_open(mut self, recover: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_recover_on_open(recover) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Opens the database, running recovery first when enabled.
    pub fn open(self) -> MagoResult<Mago> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.config.initialize()?;
        let mago = Mago::new(self.config);
        mago.initialize()?;
        Ok(mago)
    }
}
