use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use super::models::{LicenseTier, Limit, ResourceKind};
use super::usage::{IncrementOutcome, UsageSnapshot, UsageStore};

/// key: usage-store-postgres -> organization_plans,organization_usage_counters
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn quantity(&self, organization_id: i32, resource: ResourceKind) -> Result<u64> {
        let quantity: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM organization_usage_counters WHERE organization_id = $1 AND resource = $2",
        )
        .bind(organization_id)
        .bind(resource.as_str())
        .fetch_optional(&self.pool)
        .await?;
        quantity.map(to_count).transpose().map(|value| value.unwrap_or(0))
    }
}

fn to_count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("usage counter is negative: {value}"))
}

fn to_column(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("quantity {value} does not fit a BIGINT column"))
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn usage_summary(&self, organization_id: i32) -> Result<UsageSnapshot> {
        let rows = sqlx::query(
            "SELECT resource, quantity FROM organization_usage_counters WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = UsageSnapshot::empty(organization_id);
        for row in rows {
            let resource: String = row.get("resource");
            let quantity: i64 = row.get("quantity");
            let resource: ResourceKind = resource.parse()?;
            snapshot.set(resource, to_count(quantity)?);
        }
        snapshot.fetched_at = Utc::now();
        Ok(snapshot)
    }

    async fn organization_tier(&self, organization_id: i32) -> Result<Option<LicenseTier>> {
        let tier: Option<String> =
            sqlx::query_scalar("SELECT tier FROM organization_plans WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tier.map(|raw| raw.parse::<LicenseTier>()).transpose()?)
    }

    async fn set_organization_tier(&self, organization_id: i32, tier: LicenseTier) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_plans (organization_id, tier)
            VALUES ($1, $2)
            ON CONFLICT (organization_id)
            DO UPDATE SET tier = EXCLUDED.tier, updated_at = NOW()
            "#,
        )
        .bind(organization_id)
        .bind(tier.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_increment(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        amount: u64,
        limit: Limit,
    ) -> Result<IncrementOutcome> {
        let amount = to_column(amount)?;
        let ceiling = limit.finite().map(to_column).transpose()?;
        // Guarded upsert: the row lock taken by ON CONFLICT serializes concurrent callers.
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO organization_usage_counters (organization_id, resource, quantity)
            SELECT $1, $2, $3
            WHERE $4::BIGINT IS NULL OR $3 <= $4::BIGINT
            ON CONFLICT (organization_id, resource)
            DO UPDATE SET
                quantity = organization_usage_counters.quantity + EXCLUDED.quantity,
                updated_at = NOW()
            WHERE $4::BIGINT IS NULL
               OR organization_usage_counters.quantity + EXCLUDED.quantity <= $4::BIGINT
            RETURNING quantity
            "#,
        )
        .bind(organization_id)
        .bind(resource.as_str())
        .bind(amount)
        .bind(ceiling)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(current) => {
                let current = to_count(current)?;
                Ok(IncrementOutcome::Applied {
                    previous: current.saturating_sub(amount as u64),
                    current,
                })
            }
            // Read after the guard; a concurrent release may already have moved it, so
            // the reported count is informational only.
            None => Ok(IncrementOutcome::Rejected {
                current: self.quantity(organization_id, resource).await?,
            }),
        }
    }

    async fn release(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        amount: u64,
    ) -> Result<u64> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE organization_usage_counters
            SET quantity = GREATEST(quantity - $3, 0), updated_at = NOW()
            WHERE organization_id = $1 AND resource = $2
            RETURNING quantity
            "#,
        )
        .bind(organization_id)
        .bind(resource.as_str())
        .bind(to_column(amount)?)
        .fetch_optional(&self.pool)
        .await?;
        updated.map(to_count).transpose().map(|value| value.unwrap_or(0))
    }
}
