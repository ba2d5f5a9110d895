//! Postgres-backed [`ServerDirectory`]: resolves a refund-claim API key to the server record
//! it belongs to.

use sqlx::PgPool;

use x402_facilitator_core::{ServerDirectory, ServerRecord};

#[derive(Clone)]
pub struct PgServerDirectory {
    pool: PgPool,
}

impl PgServerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ServerDirectory for PgServerDirectory {
    async fn resolve(&self, api_key: &str) -> Option<ServerRecord> {
        sqlx::query_as::<_, (String, String, bool)>("SELECT server_id, resource_owner_id, active FROM servers WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .map(|(server_id, resource_owner_id, active)| ServerRecord { server_id, resource_owner_id, active })
    }
}
