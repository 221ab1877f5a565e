use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use winrate_diagnostics::engine::DriverAnalysis;
use winrate_diagnostics::ranker::DriverScore;

pub struct RunSummary {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub baseline_period: String,
    pub recent_period: String,
    pub win_rate: Option<f64>,
    pub revenue_weighted_win_rate: Option<f64>,
    pub top_negative_driver: Option<String>,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Store one analysis: the run header, both ranked lists and both models.
pub async fn record_run(pool: &PgPool, analysis: &DriverAnalysis) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO winrate_diagnostics.runs
        (id, generated_at, baseline_period, recent_period, baseline_closed, recent_closed,
         win_rate, revenue_weighted_win_rate, metrics, warnings)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(analysis.run_id)
    .bind(analysis.generated_at)
    .bind(analysis.baseline_period.to_string())
    .bind(analysis.recent_period.to_string())
    .bind(i64::try_from(analysis.baseline_closed)?)
    .bind(i64::try_from(analysis.recent_closed)?)
    .bind(analysis.metrics.win_rate)
    .bind(analysis.metrics.revenue_weighted_win_rate)
    .bind(Json(&analysis.metrics))
    .bind(Json(&analysis.warnings))
    .execute(&mut *tx)
    .await
    .context("failed to insert run")?;

    let lists: [(&str, &[DriverScore]); 2] = [
        ("negative", analysis.ranking.negative.as_slice()),
        ("positive", analysis.ranking.positive.as_slice()),
    ];
    for (polarity, scores) in lists {
        for (index, score) in scores.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO winrate_diagnostics.driver_scores
                (id, run_id, polarity, rank, driver, feature, coefficient, revenue_exposure,
                 trend_direction, trend_change, trend_multiplier, wrds)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(analysis.run_id)
            .bind(polarity)
            .bind(i32::try_from(index + 1)?)
            .bind(&score.driver)
            .bind(&score.impact.feature)
            .bind(score.impact.coefficient)
            .bind(score.revenue_exposure)
            .bind(score.trend.direction.as_str())
            .bind(score.trend.change)
            .bind(score.trend_multiplier)
            .bind(score.wrds)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert {polarity} driver {}", score.driver))?;
        }
    }

    for model in [&analysis.baseline_model, &analysis.recent_model] {
        sqlx::query(
            r#"
            INSERT INTO winrate_diagnostics.models (run_id, period, fitted_at, converged, model)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(analysis.run_id)
        .bind(model.period.as_str())
        .bind(model.fitted_at)
        .bind(model.converged)
        .bind(Json(model))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert {} model", model.period))?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn fetch_runs(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<RunSummary>> {
    let records = sqlx::query(
        r#"
        SELECT r.id, r.generated_at, r.baseline_period, r.recent_period,
               r.win_rate, r.revenue_weighted_win_rate, d.driver AS top_negative_driver
        FROM winrate_diagnostics.runs r
        LEFT JOIN winrate_diagnostics.driver_scores d
            ON d.run_id = r.id AND d.polarity = 'negative' AND d.rank = 1
        ORDER BY r.generated_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut runs = Vec::new();
    for row in records {
        runs.push(RunSummary {
            id: row.get("id"),
            generated_at: row.get("generated_at"),
            baseline_period: row.get("baseline_period"),
            recent_period: row.get("recent_period"),
            win_rate: row.get("win_rate"),
            revenue_weighted_win_rate: row.get("revenue_weighted_win_rate"),
            top_negative_driver: row.get("top_negative_driver"),
        });
    }

    Ok(runs)
}
