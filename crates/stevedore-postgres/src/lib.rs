//! PostgreSQL metadata store for stevedore.
//!
//! Provides the relational schema (including the online-GC trigger
//! contracts), a thin connection handle, a transaction helper, and one typed
//! store per entity.
//!
//! Store methods take a *query handle*, any [`tokio_postgres::GenericClient`],
//! so the same operation composes over a plain connection or an open
//! transaction. Stores never begin or commit transactions themselves; that is
//! the caller's job through [`Database::begin`].
//!
//! # Example
//!
//! ```rust,ignore
//! use stevedore_postgres::{schema, Database, RepositoryStore};
//!
//! async fn example() -> stevedore_postgres::Result<()> {
//!     let mut db = Database::connect("host=localhost user=postgres dbname=registry").await?;
//!     schema::apply_schema(db.client()).await?;
//!
//!     let store = RepositoryStore::new();
//!     let path = "gitlab-org/build".parse().expect("valid path");
//!     let tx = db.begin(None).await?;
//!     let repo = store.create_or_find_by_path(tx.client(), &path).await?;
//!     tx.commit().await?;
//!     println!("repository id {}", repo.id);
//!     Ok(())
//! }
//! ```

mod error;
pub mod schema;
mod stores;

use std::time::Duration;
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::error;

pub use error::{fk_violation_table, is_statement_canceled, is_unique_violation, Error, Result};
pub use stores::blob::BlobStore;
pub use stores::gc::{
    GCBlobTaskStore, GCConfigLinkStore, GCLayerLinkStore, GCManifestTaskStore,
    GCReviewAfterDefaultStore,
};
pub use stores::manifest::{ManifestStore, NewManifest};
pub use stores::namespace::NamespaceStore;
pub use stores::repository::{RepositoryStore, SortOrder, TagPagination};
pub use stores::tag::TagStore;

/// A database handle owning one connection.
///
/// Components that need concurrent transactions (each GC worker, the
/// importer) connect their own handle.
pub struct Database {
    client: Client,
}

impl Database {
    /// Connect and spawn the connection driver task.
    ///
    /// # Arguments
    /// * `connection_string` - e.g. `host=localhost user=postgres dbname=registry`
    ///
    /// # Errors
    /// Returns the driver error if the connection cannot be established.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {}", e);
            }
        });

        Ok(Database { client })
    }

    /// The underlying client, usable as a query handle outside transactions.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Begin a transaction, optionally bounded by a statement timeout.
    ///
    /// The timeout is installed with `SET LOCAL statement_timeout`, so it
    /// lapses with the transaction. Statements canceled by it surface with
    /// [`is_statement_canceled`] returning true.
    pub async fn begin(&mut self, timeout: Option<Duration>) -> Result<Transactor<'_>> {
        let tx = self.client.transaction().await?;
        if let Some(timeout) = timeout {
            tx.batch_execute(&format!(
                "SET LOCAL statement_timeout = {}",
                timeout.as_millis()
            ))
            .await?;
        }
        Ok(Transactor { tx })
    }
}

/// An open transaction.
///
/// [`Transactor::commit`] and [`Transactor::rollback`] consume the value, so
/// a deferred rollback after a successful commit cannot happen; dropping
/// without committing rolls back on the server.
pub struct Transactor<'a> {
    tx: Transaction<'a>,
}

impl<'a> Transactor<'a> {
    /// The transaction as a query handle for store methods.
    pub fn client(&self) -> &Transaction<'a> {
        &self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(Error::Postgres)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(Error::Postgres)
    }
}
