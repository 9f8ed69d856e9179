//! Offline backend over SQLite
//!
//! Rows are stored as JSON documents per table, with the same query
//! semantics as the hosted data API, server-assigned `id` / `created_at`,
//! the unique keys the hosted schema declares, and an in-process change feed
//! that echoes every committed write to matching subscriptions.
//!
//! Sign-in is local only: a user is created on first sign-in for an email and
//! the password is not verified.

use crate::sphere::backend::query::{is_identifier, Filter, Query};
use crate::sphere::backend::{
    ChangeFeed, IdentityProvider, ObjectStorage, RemoteStore, Topic, UserIdentity,
};
use crate::sphere::db::create_sqlite_pool_with_migration;
use crate::sphere::live::event::ChangeEvent;
use crate::sphere::live::subscription::Subscription;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Pool, Row as _, Sqlite};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique keys enforced on insert, mirroring the hosted schema
const UNIQUE_KEYS: &[(&str, &[&str])] = &[
    ("community_members", &["community_id", "user_id"]),
    ("friends", &["user_id", "friend_id"]),
    ("profiles", &["username"]),
];

struct FeedRoute {
    topic: Topic,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

type Routes = Arc<std::sync::Mutex<HashMap<u64, FeedRoute>>>;

/// SQLite-backed implementation of every backend trait
pub struct LocalBackend {
    db: Pool<Sqlite>,
    /// Serialises writes so unique-key checks and inserts are atomic
    write_lock: Mutex<()>,
    session: RwLock<Option<UserIdentity>>,
    routes: Routes,
    next_sub: AtomicU64,
    storage_dir: PathBuf,
}

impl LocalBackend {
    /// Opens (or creates) the database at `db_url`, e.g. `sqlite://civicsphere.db`
    /// or `sqlite::memory:`
    pub async fn open(db_url: &str) -> Result<Self> {
        info!("[Local] opening SQLite backend: {}", db_url);
        let db = create_sqlite_pool_with_migration(db_url).await?;
        Ok(Self::with_pool(db))
    }

    pub fn with_pool(db: Pool<Sqlite>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
            session: RwLock::new(None),
            routes: Arc::new(std::sync::Mutex::new(HashMap::new())),
            next_sub: AtomicU64::new(1),
            storage_dir: std::env::temp_dir().join("civicsphere-storage"),
        }
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Number of open subscriptions on `table`
    pub fn active_subscriptions(&self, table: &str) -> usize {
        self.routes
            .lock()
            .map(|r| r.values().filter(|f| f.topic.table == table).count())
            .unwrap_or(0)
    }

    fn check_table(table: &str) -> Result<()> {
        if is_identifier(table) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("invalid table name: {}", table))
        }
    }

    async fn load_table(&self, table: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM local_rows
            WHERE table_name = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(table)
        .fetch_all(&self.db)
        .await
        .with_context(|| format!("failed to read {}", table))?;

        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                serde_json::from_str(&data).context("corrupt row document")
            })
            .collect()
    }

    async fn matching(&self, table: &str, filter: &Filter) -> Result<Vec<Value>> {
        Ok(self
            .load_table(table)
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    /// Checks a batch of rows against the stored rows and against each other.
    ///
    /// `skip_ids` are the rows being rewritten by this batch; their stored
    /// versions do not count as clashes.
    async fn check_unique(&self, table: &str, rows: &[Value], skip_ids: &[String]) -> Result<()> {
        let Some((_, cols)) = UNIQUE_KEYS.iter().find(|(t, _)| *t == table) else {
            return Ok(());
        };
        let mut in_batch = HashSet::new();
        for row in rows {
            let Some(key) = unique_key(cols, row) else {
                continue;
            };
            let mut filter = Filter::new();
            for (col, value) in cols.iter().zip(&key) {
                filter = filter.eq(col, value.clone());
            }
            let stored_clash = self
                .matching(table, &filter)
                .await?
                .into_iter()
                .any(|r| row_id(&r).map_or(true, |id| !skip_ids.contains(&id)));
            if stored_clash || !in_batch.insert(Value::Array(key).to_string()) {
                return Err(anyhow::anyhow!(
                    "duplicate key value violates unique constraint on {} ({})",
                    table,
                    cols.join(", ")
                ));
            }
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        let routes = match self.routes.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        for route in routes.values() {
            if route.topic.table != event.table || !route.topic.event.matches(event.op) {
                continue;
            }
            if !(route.topic.admits(event.new.as_ref()) || route.topic.admits(event.old.as_ref())) {
                continue;
            }
            let _ = route.tx.send(event.clone());
        }
    }

    async fn insert_locked(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(mut obj) = row else {
                return Err(anyhow::anyhow!("row for {} must be an object", table));
            };
            if !obj.get("id").map(|v| !v.is_null()).unwrap_or(false) {
                obj.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
            }
            if !obj.get("created_at").map(|v| !v.is_null()).unwrap_or(false) {
                obj.insert("created_at".into(), Value::String(now_rfc3339()));
            }
            prepared.push(Value::Object(obj));
        }
        self.check_unique(table, &prepared, &[]).await?;

        let mut tx = self.db.begin().await.context("failed to begin transaction")?;
        for row in &prepared {
            let id = row_id(row).unwrap_or_default();
            let created_at = row
                .get("created_at")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            sqlx::query(
                r#"
                INSERT INTO local_rows (table_name, id, data, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(table)
            .bind(&id)
            .bind(row.to_string())
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("duplicate key value violates primary key on {} ({})", table, id))?;
        }
        tx.commit().await.context("failed to commit insert")?;

        debug!("[Local] inserted {} row(s) into {}", prepared.len(), table);
        for row in &prepared {
            self.publish(ChangeEvent::insert(table, row.clone()));
        }
        Ok(prepared)
    }

    async fn update_locked(&self, table: &str, filter: &Filter, patch: Value) -> Result<Vec<Value>> {
        let Value::Object(patch) = patch else {
            return Err(anyhow::anyhow!("patch for {} must be an object", table));
        };
        let olds = self.matching(table, filter).await?;
        let ids: Vec<String> = olds.iter().map(|r| row_id(r).unwrap_or_default()).collect();
        let news: Vec<Value> = olds.iter().map(|old| merge(old, &patch)).collect();
        self.check_unique(table, &news, &ids).await?;

        // all rows or none
        let mut tx = self.db.begin().await.context("failed to begin transaction")?;
        for (id, new) in ids.iter().zip(&news) {
            sqlx::query("UPDATE local_rows SET data = ? WHERE table_name = ? AND id = ?")
                .bind(new.to_string())
                .bind(table)
                .bind(id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to update {} row {}", table, id))?;
        }
        tx.commit().await.context("failed to commit update")?;

        let updated: Vec<(Value, Value)> = olds.into_iter().zip(news).collect();
        debug!("[Local] updated {} row(s) in {}", updated.len(), table);
        Ok(updated
            .into_iter()
            .map(|(old, new)| {
                self.publish(ChangeEvent::update(table, new.clone(), Some(old)));
                new
            })
            .collect())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Values of the unique columns, `None` when any is NULL (a NULL never collides)
fn unique_key(cols: &[&str], row: &Value) -> Option<Vec<Value>> {
    cols.iter()
        .map(|col| row.get(*col).filter(|v| !v.is_null()).cloned())
        .collect()
}

fn merge(old: &Value, patch: &Map<String, Value>) -> Value {
    let mut obj = old.as_object().cloned().unwrap_or_default();
    for (k, v) in patch {
        // the key of a row never changes
        if k != "id" {
            obj.insert(k.clone(), v.clone());
        }
    }
    Value::Object(obj)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        // missing values sort last, like NULLS LAST
        (None | Some(Value::Null), Some(_)) => CmpOrdering::Greater,
        (Some(_), None | Some(Value::Null)) => CmpOrdering::Less,
        _ => CmpOrdering::Equal,
    }
}

#[async_trait]
impl RemoteStore for LocalBackend {
    async fn select(&self, query: &Query) -> Result<Option<Vec<Value>>> {
        Self::check_table(&query.table)?;
        let mut rows = self.matching(&query.table, &query.filter).await?;
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(Some(rows))
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        Self::check_table(table)?;
        let _guard = self.write_lock.lock().await;
        self.insert_locked(table, rows).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<Vec<Value>> {
        Self::check_table(table)?;
        if filter.is_empty() {
            return Err(anyhow::anyhow!("refusing unfiltered update on {}", table));
        }
        let _guard = self.write_lock.lock().await;
        self.update_locked(table, filter, patch).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Value>> {
        Self::check_table(table)?;
        if filter.is_empty() {
            return Err(anyhow::anyhow!("refusing unfiltered delete on {}", table));
        }
        let _guard = self.write_lock.lock().await;
        let doomed = self.matching(table, filter).await?;
        let mut tx = self.db.begin().await.context("failed to begin transaction")?;
        for row in &doomed {
            sqlx::query("DELETE FROM local_rows WHERE table_name = ? AND id = ?")
                .bind(table)
                .bind(row_id(row).unwrap_or_default())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to delete from {}", table))?;
        }
        tx.commit().await.context("failed to commit delete")?;
        debug!("[Local] deleted {} row(s) from {}", doomed.len(), table);
        for row in &doomed {
            self.publish(ChangeEvent::delete(table, row.clone()));
        }
        Ok(doomed)
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Vec<Value>> {
        Self::check_table(table)?;
        let _guard = self.write_lock.lock().await;
        let existing = match row.get(on_conflict) {
            Some(key) if !key.is_null() => {
                let filter = Filter::new().eq(on_conflict, key.clone());
                self.matching(table, &filter).await?.into_iter().next()
            }
            _ => None,
        };
        match existing {
            Some(current) => {
                let patch = row.as_object().cloned().unwrap_or_default();
                let filter = Filter::new().eq("id", row_id(&current).unwrap_or_default());
                self.update_locked(table, &filter, Value::Object(patch)).await
            }
            None => self.insert_locked(table, vec![row]).await,
        }
    }
}

#[async_trait]
impl ChangeFeed for LocalBackend {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        Self::check_table(&topic.table)?;
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let table = topic.table.clone();
        self.routes
            .lock()
            .map_err(|_| anyhow::anyhow!("subscription registry poisoned"))?
            .insert(id, FeedRoute { topic, tx });
        debug!("[Local] subscription #{} on {}", id, table);

        let routes = self.routes.clone();
        Ok(Subscription::new(id, table, rx, move || {
            if let Ok(mut r) = routes.lock() {
                r.remove(&id);
            }
        }))
    }
}

#[async_trait]
impl IdentityProvider for LocalBackend {
    async fn current_user(&self) -> Option<UserIdentity> {
        self.session.read().await.clone()
    }

    async fn sign_in(&self, email: &str, _password: &str) -> Result<UserIdentity> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(anyhow::anyhow!("email is required"));
        }
        let existing = sqlx::query("SELECT id, email FROM local_users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.db)
            .await
            .context("failed to look up local user")?;

        let user = match existing {
            Some(row) => UserIdentity {
                id: row.get("id"),
                email: row.get("email"),
            },
            None => {
                let user = UserIdentity {
                    id: Uuid::new_v4().to_string(),
                    email: email.clone(),
                };
                sqlx::query("INSERT INTO local_users (id, email, created_at) VALUES (?, ?, ?)")
                    .bind(&user.id)
                    .bind(&user.email)
                    .bind(now_rfc3339())
                    .execute(&self.db)
                    .await
                    .context("failed to create local user")?;
                info!("[Local] created local user {} for {}", user.id, email);
                user
            }
        };
        *self.session.write().await = Some(user.clone());
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.write().await = None;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let rel = path.trim_start_matches('/');
        if rel.split('/').any(|seg| seg == "..") {
            return Err(anyhow::anyhow!("invalid object path: {}", path));
        }
        let target = self.storage_dir.join(bucket).join(rel);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        if !content_type.starts_with("image/") {
            warn!("[Local] stored non-image object {} ({})", rel, content_type);
        }
        Ok(format!("file://{}", target.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::live::event::{ChangeOp, EventKind};
    use serde_json::json;

    async fn backend() -> LocalBackend {
        LocalBackend::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamp() {
        let b = backend().await;
        let rows = b.insert("communities", vec![json!({"name": "Alpha"})]).await.unwrap();
        assert!(rows[0]["id"].as_str().is_some());
        assert!(rows[0]["created_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn select_filters_orders_and_limits() {
        let b = backend().await;
        for (name, n) in [("a", 3), ("b", 1), ("c", 2)] {
            b.insert("communities", vec![json!({"name": name, "member_count": n, "visibility": "public"})])
                .await
                .unwrap();
        }
        b.insert("communities", vec![json!({"name": "d", "member_count": 9, "visibility": "closed"})])
            .await
            .unwrap();
        let q = Query::table("communities")
            .eq("visibility", "public")
            .order("member_count", false)
            .limit(2);
        let rows = b.select(&q).await.unwrap().unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn unique_membership_is_enforced() {
        let b = backend().await;
        let row = json!({"community_id": "c1", "user_id": "u1", "role": "member"});
        b.insert("community_members", vec![row.clone()]).await.unwrap();
        assert!(b.insert("community_members", vec![row]).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_within_one_batch_writes_nothing() {
        let b = backend().await;
        let row = json!({"user_id": "u1", "friend_id": "u2", "status": "pending"});
        assert!(b.insert("friends", vec![row.clone(), row]).await.is_err());
        let all = b.select(&Query::table("friends")).await.unwrap().unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_update_keeps_every_row_and_stays_silent() {
        let b = backend().await;
        b.insert(
            "friends",
            vec![
                json!({"user_id": "u1", "friend_id": "f1"}),
                json!({"user_id": "u1", "friend_id": "f2"}),
            ],
        )
        .await
        .unwrap();
        let mut sub = b.subscribe(Topic::table("friends").event(EventKind::All)).await.unwrap();

        // both rows would become (u1, f3)
        let clash = b
            .update("friends", &Filter::new().eq("user_id", "u1"), json!({"friend_id": "f3"}))
            .await;
        assert!(clash.is_err());

        let mut friends: Vec<String> = b
            .select(&Query::table("friends"))
            .await
            .unwrap()
            .unwrap()
            .iter()
            .map(|r| r["friend_id"].as_str().unwrap().to_string())
            .collect();
        friends.sort();
        assert_eq!(friends, vec!["f1", "f2"]);

        b.insert("friends", vec![json!({"user_id": "u9", "friend_id": "f9"})]).await.unwrap();
        let ev = sub.next().await.unwrap();
        assert_eq!(ev.op, ChangeOp::Insert);
        assert_eq!(ev.new.unwrap()["user_id"], "u9");
    }

    #[tokio::test]
    async fn feed_delivers_filtered_events_until_closed() {
        let b = backend().await;
        let topic = Topic::table("notifications")
            .event(EventKind::All)
            .filter_eq("user_id", "u1");
        let mut sub = b.subscribe(topic).await.unwrap();
        assert_eq!(b.active_subscriptions("notifications"), 1);

        b.insert("notifications", vec![json!({"user_id": "u2", "title": "x"})]).await.unwrap();
        b.insert("notifications", vec![json!({"user_id": "u1", "title": "y"})]).await.unwrap();
        let ev = sub.next().await.unwrap();
        assert_eq!(ev.op, ChangeOp::Insert);
        assert_eq!(ev.new.unwrap()["title"], "y");

        sub.close();
        assert_eq!(b.active_subscriptions("notifications"), 0);
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_column() {
        let b = backend().await;
        b.upsert("profiles", json!({"id": "u1", "username": "ana"}), "id").await.unwrap();
        let rows = b
            .upsert("profiles", json!({"id": "u1", "bio": "hi"}), "id")
            .await
            .unwrap();
        assert_eq!(rows[0]["username"], "ana");
        assert_eq!(rows[0]["bio"], "hi");
        let all = b.select(&Query::table("profiles")).await.unwrap().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn local_sign_in_is_stable_per_email() {
        let b = backend().await;
        let first = b.sign_in("Ana@Example.com", "x").await.unwrap();
        b.sign_out().await.unwrap();
        assert!(b.current_user().await.is_none());
        let second = b.sign_in("ana@example.com", "y").await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
