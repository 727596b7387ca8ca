//! CMP command API.
//!
//! Third parties invoke named commands with a JSON argument and an optional
//! completion callback. Failures, including unknown command names, are handed
//! to the callback and never abort processing of later commands.

mod handle;

pub use handle::*;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::errors::CmpError;
use crate::models::{
    ConsentData, PingResult, PublisherConsents, SetConsentParameter, VendorConsents,
};
use crate::notify::{Listener, SubscriptionId};
use crate::store::{ConsentStore, SharedStore};

/// Command names understood by the processor.
pub mod names {
    pub const PING: &str = "ping";
    pub const GET_VENDOR_CONSENTS: &str = "getVendorConsents";
    pub const GET_PUBLISHER_CONSENTS: &str = "getPublisherConsents";
    pub const GET_CONSENT_DATA: &str = "getConsentData";
    pub const GET_VENDOR_LIST: &str = "getVendorList";
    pub const ADD_EVENT_LISTENER: &str = "addEventListener";
    pub const REMOVE_EVENT_LISTENER: &str = "removeEventListener";
    pub const SET_GLOBAL_CONSENT: &str = "setGlobalConsent";
    pub const SET_VENDOR_CONSENT: &str = "setVendorConsent";
    pub const SET_PURPOSE_CONSENT: &str = "setPurposeConsent";
    pub const SET_PUBLISHER_CONSENT: &str = "setPublisherConsent";
    pub const SELECT_ALL_VENDORS: &str = "selectAllVendors";
    pub const SELECT_ALL_PURPOSES: &str = "selectAllPurposes";
}

/// Completion callback of a command.
pub type CommandCallback = Box<dyn FnOnce(Result<Value, CmpError>) + Send>;

/// One command invocation.
pub struct Command {
    pub name: String,
    pub parameter: Value,
    /// Event listener for `addEventListener`
    pub listener: Option<Listener<ConsentStore>>,
    callback: Option<CommandCallback>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("parameter", &self.parameter)
            .field("listener", &self.listener.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Command {
    pub fn new(name: impl Into<String>, parameter: Value) -> Self {
        Self {
            name: name.into(),
            parameter,
            listener: None,
            callback: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<Value, CmpError>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// `addEventListener` for the given event name.
    pub fn add_event_listener(event: &str, listener: Listener<ConsentStore>) -> Self {
        Self {
            name: names::ADD_EVENT_LISTENER.to_string(),
            parameter: Value::String(event.to_string()),
            listener: Some(listener),
            callback: None,
        }
    }

    /// Deliver a result to the caller's callback, if any.
    pub fn complete(self, result: Result<Value, CmpError>) {
        if let Some(callback) = self.callback {
            callback(result);
        }
    }
}

/// Executes commands against the consent store.
#[derive(Clone)]
pub struct CommandProcessor {
    store: SharedStore,
}

impl CommandProcessor {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Execute one command and report the outcome to its callback.
    pub async fn process(&self, mut command: Command) {
        tracing::debug!("Processing command {}", command.name);

        let listener = command.listener.take();
        let parameter = std::mem::take(&mut command.parameter);
        let result = self.execute(&command.name, parameter, listener).await;
        if let Err(e) = &result {
            tracing::warn!("Command {} failed: {}", command.name, e);
        }
        command.complete(result);
    }

    /// Execute queued commands strictly in arrival order.
    pub async fn process_queue(&self, queue: Vec<Command>) {
        if !queue.is_empty() {
            tracing::info!("Processing {} queued command(s)", queue.len());
        }
        for command in queue {
            self.process(command).await;
        }
    }

    async fn execute(
        &self,
        name: &str,
        parameter: Value,
        listener: Option<Listener<ConsentStore>>,
    ) -> Result<Value, CmpError> {
        let mut store = self.store.lock().await;

        match name {
            names::PING => to_value(PingResult {
                gdpr_applies_globally: false,
                cmp_loaded: store.is_loaded(),
                cmp_ready: store.is_ready(),
            }),
            names::GET_VENDOR_CONSENTS => {
                let record = store.record();
                let vendor_consents = match optional_ids(parameter)? {
                    Some(ids) => select(ids, |id| store.has_vendor_consent(id)),
                    None => record.vendor_consent.clone(),
                };
                to_value(VendorConsents {
                    metadata: store.encoded_consent().vendor,
                    has_global_consent: store.has_global_consent(),
                    purpose_consents: record.purpose_consent.clone(),
                    vendor_consents,
                })
            }
            names::GET_PUBLISHER_CONSENTS => {
                let publisher_consents = match optional_ids(parameter)? {
                    Some(ids) => select(ids, |id| store.has_publisher_consent(id)),
                    None => store.record().publisher_consent.clone(),
                };
                to_value(PublisherConsents {
                    metadata: store.encoded_consent().publisher,
                    publisher_name: store.publisher_name().to_string(),
                    publisher_consents,
                })
            }
            names::GET_CONSENT_DATA => to_value(ConsentData {
                consent_data: store.encoded_consent().vendor,
                has_global_scope: false,
            }),
            names::GET_VENDOR_LIST => match store.vendor_catalog() {
                Some(catalog) => to_value(catalog),
                None => Err(CmpError::NotReady(
                    "Vendor list has not been loaded".to_string(),
                )),
            },
            names::ADD_EVENT_LISTENER => {
                let event: String = parse_parameter(name, parameter)?;
                let listener = listener.ok_or_else(|| {
                    CmpError::InvalidParameter("addEventListener requires a listener".to_string())
                })?;
                let id = store.add_event_listener(&event, listener);
                Ok(json!({ "listenerId": id.0 }))
            }
            names::REMOVE_EVENT_LISTENER => {
                let id: u64 = parse_parameter(name, parameter)?;
                let removed = store.remove_event_listener(SubscriptionId(id));
                Ok(json!({ "removed": removed }))
            }
            names::SET_GLOBAL_CONSENT => {
                let consent: bool = parse_parameter(name, parameter)?;
                let applied = store.set_global_consent(consent).await?;
                Ok(json!({ "applied": applied }))
            }
            names::SET_VENDOR_CONSENT => {
                let SetConsentParameter { id, consent } = parse_parameter(name, parameter)?;
                let applied = store.set_vendor_consent(id, consent).await?;
                Ok(json!({ "applied": applied }))
            }
            names::SET_PURPOSE_CONSENT => {
                let SetConsentParameter { id, consent } = parse_parameter(name, parameter)?;
                let applied = store.set_purpose_consent(id, consent).await?;
                Ok(json!({ "applied": applied }))
            }
            names::SET_PUBLISHER_CONSENT => {
                let SetConsentParameter { id, consent } = parse_parameter(name, parameter)?;
                let applied = store.set_publisher_consent(id, consent).await?;
                Ok(json!({ "applied": applied }))
            }
            names::SELECT_ALL_VENDORS => {
                let consent: bool = parse_parameter(name, parameter)?;
                let applied = store.select_all_vendors(consent).await?;
                Ok(json!({ "applied": applied }))
            }
            names::SELECT_ALL_PURPOSES => {
                let consent: bool = parse_parameter(name, parameter)?;
                let applied = store.select_all_purposes(consent).await?;
                Ok(json!({ "applied": applied }))
            }
            _ => Err(CmpError::UnknownCommand(format!("Unknown command: {}", name))),
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, CmpError> {
    serde_json::to_value(value).map_err(|e| CmpError::Internal(format!("Serialization: {}", e)))
}

fn parse_parameter<T: DeserializeOwned>(command: &str, parameter: Value) -> Result<T, CmpError> {
    serde_json::from_value(parameter).map_err(|e| {
        CmpError::InvalidParameter(format!("Invalid parameter for {}: {}", command, e))
    })
}

/// `null` means "all"; otherwise a list of ids.
fn optional_ids(parameter: Value) -> Result<Option<Vec<u16>>, CmpError> {
    if parameter.is_null() {
        return Ok(None);
    }
    parse_parameter("id list", parameter).map(Some)
}

fn select(ids: Vec<u16>, lookup: impl Fn(u16) -> bool) -> BTreeMap<u16, bool> {
    ids.into_iter().map(|id| (id, lookup(id))).collect()
}
