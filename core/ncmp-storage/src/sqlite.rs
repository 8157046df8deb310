//! SQLite implementation of the inventory traits.

use crate::error::{StorageError, StorageResult};
use crate::{HandleStore, OperationalDataRepository, SubscriptionPersistence};
use ncmp_types::{
    CmHandle, CmHandleId, CmHandleState, CmHandleSubscriptionStatus, CompositeState,
    DataStoreSyncState, LockReasonCategory, ModuleReference, SubscriptionEventResponse,
    SubscriptionStatus,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Inventory store backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteHandleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandleStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cm_handles (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                sync_state TEXT NOT NULL,
                lock_category TEXT,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cm_handles_state ON cm_handles(state);
            CREATE INDEX IF NOT EXISTS idx_cm_handles_sync_state ON cm_handles(sync_state);

            CREATE TABLE IF NOT EXISTS operational_data (
                cm_handle_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS module_references (
                cm_handle_id TEXT NOT NULL,
                module_name TEXT NOT NULL,
                revision TEXT NOT NULL,
                UNIQUE(cm_handle_id, module_name, revision)
            );

            CREATE TABLE IF NOT EXISTS subscription_statuses (
                client_id TEXT NOT NULL,
                subscription_name TEXT NOT NULL,
                cm_handle_id TEXT NOT NULL,
                status TEXT NOT NULL,
                details TEXT,
                UNIQUE(client_id, subscription_name, cm_handle_id)
            );
            ",
        )?;
        Ok(())
    }

    fn query_handles<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> StorageResult<Vec<CmHandle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut handles = Vec::new();
        for row in rows {
            handles.push(serde_json::from_str(&row?)?);
        }
        Ok(handles)
    }

    fn write_handle(tx: &Transaction<'_>, handle: &CmHandle) -> StorageResult<usize> {
        let state = &handle.composite_state;
        let updated = tx.execute(
            "UPDATE cm_handles SET state = ?2, sync_state = ?3, lock_category = ?4, data = ?5 WHERE id = ?1",
            params![
                handle.id.as_str(),
                state.cm_handle_state.as_str(),
                state.operational_sync_state().as_str(),
                lock_category(state),
                serde_json::to_string(handle)?,
            ],
        )?;
        Ok(updated)
    }

    /// Replaces the composite state in one transaction. With `expected` set,
    /// nothing is written unless the stored state still matches it.
    fn replace_state(
        &self,
        id: &CmHandleId,
        expected: Option<CmHandleState>,
        state: &CompositeState,
    ) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM cm_handles WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(json) = data else {
            return Err(StorageError::NotFound(id.to_string()));
        };

        let mut handle: CmHandle = serde_json::from_str(&json)?;
        if let Some(expected) = expected {
            if handle.composite_state.cm_handle_state != expected {
                debug!(
                    "{id} is {} instead of {expected}, state not written",
                    handle.composite_state.cm_handle_state
                );
                return Ok(false);
            }
        }
        handle.composite_state = state.clone();
        Self::write_handle(&tx, &handle)?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_in_tx(tx: &Transaction<'_>, id: &CmHandleId) -> StorageResult<()> {
        if !id.is_valid() {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        let removed = tx.execute("DELETE FROM cm_handles WHERE id = ?1", params![id.as_str()])?;
        if removed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        tx.execute(
            "DELETE FROM operational_data WHERE cm_handle_id = ?1",
            params![id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM module_references WHERE cm_handle_id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }
}

fn lock_category(state: &CompositeState) -> Option<&'static str> {
    match (&state.cm_handle_state, &state.lock_reason) {
        (CmHandleState::Locked, Some(reason)) => Some(reason.category.as_str()),
        _ => None,
    }
}

impl HandleStore for SqliteHandleStore {
    fn get_by_id(&self, id: &CmHandleId) -> StorageResult<CmHandle> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM cm_handles WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    fn get_by_ids(&self, ids: &[CmHandleId]) -> StorageResult<Vec<CmHandle>> {
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_by_id(id) {
                Ok(handle) => handles.push(handle),
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(handles)
    }

    fn get_by_state(&self, state: CmHandleState) -> StorageResult<Vec<CmHandle>> {
        self.query_handles(
            "SELECT data FROM cm_handles WHERE state = ?1",
            params![state.as_str()],
        )
    }

    fn get_by_operational_sync_state(
        &self,
        sync_state: DataStoreSyncState,
    ) -> StorageResult<Vec<CmHandle>> {
        self.query_handles(
            "SELECT data FROM cm_handles WHERE sync_state = ?1",
            params![sync_state.as_str()],
        )
    }

    fn get_by_lock_reason_category(
        &self,
        category: LockReasonCategory,
    ) -> StorageResult<Vec<CmHandle>> {
        self.query_handles(
            "SELECT data FROM cm_handles WHERE state = 'LOCKED' AND lock_category = ?1",
            params![category.as_str()],
        )
    }

    fn insert_batch(&self, handles: &[CmHandle]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut duplicates = Vec::new();

        for handle in handles {
            let state = &handle.composite_state;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO cm_handles (id, state, sync_state, lock_category, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    handle.id.as_str(),
                    state.cm_handle_state.as_str(),
                    state.operational_sync_state().as_str(),
                    lock_category(state),
                    serde_json::to_string(handle)?,
                ],
            )?;
            if inserted == 0 {
                duplicates.push(handle.id.clone());
            }
        }
        tx.commit()?;

        debug!(
            "Inserted {} cm handles ({} duplicates)",
            handles.len() - duplicates.len(),
            duplicates.len()
        );
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(StorageError::AlreadyExists(duplicates))
        }
    }

    fn save(&self, handle: &CmHandle) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if Self::write_handle(&tx, handle)? == 0 {
            return Err(StorageError::NotFound(handle.id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    fn save_state(&self, id: &CmHandleId, state: &CompositeState) -> StorageResult<()> {
        self.replace_state(id, None, state).map(|_| ())
    }

    fn save_state_if(
        &self,
        id: &CmHandleId,
        expected: CmHandleState,
        state: &CompositeState,
    ) -> StorageResult<bool> {
        self.replace_state(id, Some(expected), state)
    }

    fn delete_batch(&self, ids: &[CmHandleId]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in ids {
            // Dropping the transaction on error rolls the whole batch back.
            Self::delete_in_tx(&tx, id)?;
        }
        tx.commit()?;
        debug!("Deleted batch of {} cm handles", ids.len());
        Ok(())
    }

    fn delete_one(&self, id: &CmHandleId) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::delete_in_tx(&tx, id)?;
        tx.commit()?;
        Ok(())
    }

    fn count_by_state(&self) -> StorageResult<Vec<(CmHandleState, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM cm_handles GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (name, count) = row?;
            let state = CmHandleState::from_name(&name)
                .ok_or_else(|| StorageError::InvalidData(format!("unknown state '{name}'")))?;
            counts.push((state, count as usize));
        }
        Ok(counts)
    }
}

impl OperationalDataRepository for SqliteHandleStore {
    fn save_data(&self, id: &CmHandleId, data: &serde_json::Value) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO operational_data (cm_handle_id, data, updated_at) VALUES (?1, ?2, ?3)",
            params![
                id.as_str(),
                serde_json::to_string(data)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_data(&self, id: &CmHandleId) -> StorageResult<Option<serde_json::Value>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM operational_data WHERE cm_handle_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    fn delete_data(&self, id: &CmHandleId) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM operational_data WHERE cm_handle_id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn save_module_references(
        &self,
        id: &CmHandleId,
        modules: &[ModuleReference],
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM module_references WHERE cm_handle_id = ?1",
            params![id.as_str()],
        )?;
        for module in modules {
            tx.execute(
                "INSERT OR IGNORE INTO module_references (cm_handle_id, module_name, revision) VALUES (?1, ?2, ?3)",
                params![id.as_str(), module.module_name, module.revision],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_module_references(&self, id: &CmHandleId) -> StorageResult<Vec<ModuleReference>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT module_name, revision FROM module_references WHERE cm_handle_id = ?1 ORDER BY module_name",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok(ModuleReference {
                module_name: row.get(0)?,
                revision: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl SubscriptionPersistence for SqliteHandleStore {
    fn save_response(&self, response: &SubscriptionEventResponse) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for status in &response.cm_handle_statuses {
            tx.execute(
                "INSERT OR REPLACE INTO subscription_statuses (client_id, subscription_name, cm_handle_id, status, details) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    response.client_id,
                    response.subscription_name,
                    status.cm_handle_id.as_str(),
                    status.status.as_str(),
                    status.details,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn cm_handle_statuses(
        &self,
        client_id: &str,
        subscription_name: &str,
    ) -> StorageResult<Vec<CmHandleSubscriptionStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT cm_handle_id, status, details FROM subscription_statuses WHERE client_id = ?1 AND subscription_name = ?2 ORDER BY cm_handle_id",
        )?;
        let rows = stmt.query_map(params![client_id, subscription_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut statuses = Vec::new();
        for row in rows {
            let (id, status, details) = row?;
            let status = SubscriptionStatus::from_name(&status).ok_or_else(|| {
                StorageError::InvalidData(format!("unknown subscription status '{status}'"))
            })?;
            statuses.push(CmHandleSubscriptionStatus {
                cm_handle_id: CmHandleId::new(id),
                status,
                details,
            });
        }
        Ok(statuses)
    }
}
