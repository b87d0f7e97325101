//! Document number allocation.
//!
//! The allocator hands out `{PREFIX}/{YYYYMMDD}/{SEQ:04}` candidates from a
//! per-`(tenant, prefix, day)` counter and reserves each one in a registry that
//! enforces uniqueness per tenant. A candidate someone else already holds is
//! never overwritten: the allocation fails and the counter moves past it, so the
//! caller's retry gets a fresh number.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, warn};

use stockflow_core::TenantId;
use stockflow_transfer::DocumentNumber;

use crate::postgres::PgContext;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("document number {0} is already taken")]
    Taken(DocumentNumber),

    #[error("invalid document number: {0}")]
    Invalid(String),

    #[error("document number registry unavailable: {0}")]
    Unavailable(String),
}

/// Tenant-scoped uniqueness registry for document numbers.
pub trait DocumentNumberRegistry: Send + Sync {
    /// Claim `number`; fails with [`RegistryError::Taken`] if it is held.
    fn reserve(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError>;

    /// Give a reservation back (saga compensation). Unknown numbers are ignored.
    fn release(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError>;

    /// Highest reserved sequence for `prefix` on `day`, 0 if none.
    fn last_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        day: NaiveDate,
    ) -> Result<u32, RegistryError>;
}

impl<R> DocumentNumberRegistry for std::sync::Arc<R>
where
    R: DocumentNumberRegistry + ?Sized,
{
    fn reserve(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError> {
        (**self).reserve(tenant_id, number)
    }

    fn release(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError> {
        (**self).release(tenant_id, number)
    }

    fn last_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        day: NaiveDate,
    ) -> Result<u32, RegistryError> {
        (**self).last_sequence(tenant_id, prefix, day)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentNumberRegistry {
    reserved: RwLock<HashSet<(TenantId, DocumentNumber)>>,
}

impl InMemoryDocumentNumberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reserved(&self, tenant_id: TenantId, number: &DocumentNumber) -> bool {
        self.reserved
            .read()
            .map(|set| set.contains(&(tenant_id, number.clone())))
            .unwrap_or(false)
    }
}

impl DocumentNumberRegistry for InMemoryDocumentNumberRegistry {
    fn reserve(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError> {
        let mut set = self
            .reserved
            .write()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        if !set.insert((tenant_id, number.clone())) {
            return Err(RegistryError::Taken(number.clone()));
        }
        Ok(())
    }

    fn release(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError> {
        let mut set = self
            .reserved
            .write()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        set.remove(&(tenant_id, number.clone()));
        Ok(())
    }

    fn last_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        day: NaiveDate,
    ) -> Result<u32, RegistryError> {
        let set = self
            .reserved
            .read()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        Ok(set
            .iter()
            .filter(|(t, n)| *t == tenant_id && n.prefix() == prefix && n.day() == Some(day))
            .filter_map(|(_, n)| n.sequence())
            .max()
            .unwrap_or(0))
    }
}

/// Registry backed by the `document_numbers` table (primary key on tenant + number).
#[derive(Debug, Clone)]
pub struct PostgresDocumentNumberRegistry {
    ctx: PgContext,
}

impl PostgresDocumentNumberRegistry {
    pub fn new(ctx: PgContext) -> Self {
        Self { ctx }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RegistryError {
    RegistryError::Unavailable(format!("{operation}: {err}"))
}

impl DocumentNumberRegistry for PostgresDocumentNumberRegistry {
    fn reserve(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError> {
        let (Some(day), Some(sequence)) = (number.day(), number.sequence()) else {
            return Err(RegistryError::Invalid(number.to_string()));
        };

        let result = self
            .ctx
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO document_numbers
                        (tenant_id, document_number, prefix, business_day, sequence)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (tenant_id, document_number) DO NOTHING
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(number.as_str())
                .bind(number.prefix())
                .bind(day)
                .bind(sequence as i32)
                .execute(self.ctx.pool()),
            )
            .map_err(|e| map_sqlx_error("reserve", e))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::Taken(number.clone()));
        }
        Ok(())
    }

    fn release(&self, tenant_id: TenantId, number: &DocumentNumber) -> Result<(), RegistryError> {
        self.ctx
            .block_on(
                sqlx::query(
                    "DELETE FROM document_numbers WHERE tenant_id = $1 AND document_number = $2",
                )
                .bind(tenant_id.as_uuid())
                .bind(number.as_str())
                .execute(self.ctx.pool()),
            )
            .map_err(|e| map_sqlx_error("release", e))?;
        Ok(())
    }

    fn last_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        day: NaiveDate,
    ) -> Result<u32, RegistryError> {
        let row = self
            .ctx
            .block_on(
                sqlx::query(
                    r#"
                    SELECT COALESCE(MAX(sequence), 0) AS last_sequence
                    FROM document_numbers
                    WHERE tenant_id = $1 AND prefix = $2 AND business_day = $3
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(prefix)
                .bind(day)
                .fetch_one(self.ctx.pool()),
            )
            .map_err(|e| map_sqlx_error("last_sequence", e))?;

        let last: i32 = row
            .try_get("last_sequence")
            .map_err(|e| map_sqlx_error("last_sequence", e))?;
        Ok(last.max(0) as u32)
    }
}

/// Sequential allocator over a [`DocumentNumberRegistry`].
#[derive(Debug)]
pub struct DocumentNumberAllocator<R> {
    registry: R,
    counters: Mutex<HashMap<(TenantId, String, NaiveDate), u32>>,
}

impl<R> DocumentNumberAllocator<R>
where
    R: DocumentNumberRegistry,
{
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Reserve the next number for `prefix` on `day`.
    ///
    /// The counter is seeded from the registry the first time a key is seen.
    pub fn allocate(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        day: NaiveDate,
    ) -> Result<DocumentNumber, RegistryError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| RegistryError::Unavailable("allocator lock poisoned".to_string()))?;

        let key = (tenant_id, prefix.to_string(), day);
        let last = match counters.get(&key) {
            Some(last) => *last,
            None => self.registry.last_sequence(tenant_id, prefix, day)?,
        };

        let next = last.checked_add(1).ok_or_else(|| {
            RegistryError::Invalid(format!("{prefix} sequence exhausted for {day}"))
        })?;
        let candidate = DocumentNumber::compose(prefix, day, next)
            .map_err(|e| RegistryError::Invalid(e.to_string()))?;

        // The counter advances even when the candidate is taken.
        counters.insert(key, next);

        match self.registry.reserve(tenant_id, &candidate) {
            Ok(()) => {
                debug!(document_number = %candidate, "document number reserved");
                Ok(candidate)
            }
            Err(err) => {
                warn!(
                    document_number = %candidate,
                    error = %err,
                    "document number reservation failed"
                );
                Err(err)
            }
        }
    }

    pub fn release(
        &self,
        tenant_id: TenantId,
        number: &DocumentNumber,
    ) -> Result<(), RegistryError> {
        self.registry.release(tenant_id, number)
    }
}
