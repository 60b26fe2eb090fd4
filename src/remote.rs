//! Bases group tables on a remote service. The grid never talks to it, the
//! contract lives here so hosts share one validation path.
use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaseId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRefId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base {
    pub id: BaseId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub id: TableRefId,
    pub base: BaseId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Validation(String),
    Unavailable(String),
    NotFound,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Validation(reason) => write!(f, "{reason}"),
            RemoteError::Unavailable(reason) => write!(f, "service unavailable: {reason}"),
            RemoteError::NotFound => write!(f, "not found"),
        }
    }
}

impl std::error::Error for RemoteError {}

pub trait BaseService {
    fn create_base(&mut self, name: &str) -> Result<BaseId, RemoteError>;
    fn list_bases(&self) -> Result<Vec<Base>, RemoteError>;
    fn create_table(&mut self, base: BaseId, name: &str) -> Result<TableRef, RemoteError>;
    fn table(&self, id: TableRefId) -> Result<TableRef, RemoteError>;
}

/// Validates names before they reach the service.
pub struct BaseDirectory<S: BaseService> {
    service: S,
}

impl<S: BaseService> BaseDirectory<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    /// Sends the trimmed name. Blank names never leave the directory.
    pub fn create_base(&mut self, name: &str) -> Result<BaseId, RemoteError> {
        let name = required(name, "Base name is required")?;
        let id = self.service.create_base(name)?;
        debug!("Created base {:?} \"{name}\"", id);
        Ok(id)
    }

    /// The bases known to the service, empty when it cannot be reached.
    pub fn list_bases(&self) -> Vec<Base> {
        match self.service.list_bases() {
            Ok(bases) => bases,
            Err(e) => {
                warn!("Listing bases failed: {e}");
                Vec::new()
            }
        }
    }

    pub fn create_table(&mut self, base: BaseId, name: &str) -> Result<TableRef, RemoteError> {
        let name = required(name, "Table name is required")?;
        self.service.create_table(base, name)
    }

    pub fn table(&self, id: TableRefId) -> Result<TableRef, RemoteError> {
        self.service.table(id)
    }
}

fn required<'a>(name: &'a str, message: &str) -> Result<&'a str, RemoteError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RemoteError::Validation(message.to_string()));
    }
    Ok(name)
}

/// Keeps bases and tables in memory. Can be switched offline, after which
/// every call fails with `Unavailable`.
#[derive(Debug, Default)]
pub struct InMemoryBases {
    bases: Vec<Base>,
    tables: Vec<TableRef>,
    next_id: u64,
    offline: bool,
}

impl InMemoryBases {
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            return Err(RemoteError::Unavailable("offline".into()));
        }
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl BaseService for InMemoryBases {
    fn create_base(&mut self, name: &str) -> Result<BaseId, RemoteError> {
        self.check_online()?;
        let id = BaseId(self.next_id());
        self.bases.push(Base {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    fn list_bases(&self) -> Result<Vec<Base>, RemoteError> {
        self.check_online()?;
        Ok(self.bases.clone())
    }

    fn create_table(&mut self, base: BaseId, name: &str) -> Result<TableRef, RemoteError> {
        self.check_online()?;
        if !self.bases.iter().any(|b| b.id == base) {
            return Err(RemoteError::NotFound);
        }
        let table = TableRef {
            id: TableRefId(self.next_id()),
            base,
            name: name.to_string(),
        };
        self.tables.push(table.clone());
        Ok(table)
    }

    fn table(&self, id: TableRefId) -> Result<TableRef, RemoteError> {
        self.check_online()?;
        self.tables
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }
}
