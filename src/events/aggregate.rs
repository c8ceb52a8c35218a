// src/events/aggregate.rs
//! Quarter-based event aggregation.
//!
//! Lookup-then-insert runs under one async mutex, so concurrent callers can
//! never create two events for the same dedup key.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::delta::validate_delta;
use super::detect::{generate_dedup_key, get_quarter};
use super::{EventDetection, EventOutcome, EventStats, EventStatus, RegulatoryEvent};
use crate::store::EventStore;

pub struct EventAggregator {
    store: Arc<dyn EventStore>,
    write_lock: Mutex<()>,
}

impl EventAggregator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn create_or_update_event(
        &self,
        article_id: &str,
        detection: &EventDetection,
    ) -> Result<EventOutcome> {
        self.create_or_update_event_at(article_id, detection, Utc::now())
            .await
    }

    /// `now` stands in for a missing event date.
    pub async fn create_or_update_event_at(
        &self,
        article_id: &str,
        detection: &EventDetection,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome> {
        let event_date = detection.event_date.unwrap_or(now);
        let quarter = get_quarter(&event_date);
        let dedup_key = generate_dedup_key(
            &detection.primary_regulation,
            detection.event_type.as_str(),
            &quarter,
        );
        let validation = validate_delta(&detection.narrative);
        let status = if validation.is_valid {
            EventStatus::Complete
        } else {
            EventStatus::Incomplete
        };

        let _guard = self.write_lock.lock().await;

        if let Some(mut existing) = self
            .store
            .find_by_dedup_key(&dedup_key)
            .await
            .with_context(|| format!("looking up event {dedup_key}"))?
        {
            if !existing.source_article_ids.iter().any(|id| id == article_id) {
                existing.source_article_ids.push(article_id.to_string());
                if let Some(date) = detection.event_date {
                    existing.event_date_earliest = existing.event_date_earliest.min(date);
                    existing.event_date_latest = existing.event_date_latest.max(date);
                }
                // Keep the better delta: only an incomplete event takes a complete one.
                if existing.status != EventStatus::Complete && status == EventStatus::Complete {
                    existing.narrative = detection.narrative.clone();
                    existing.completeness_score = validation.completeness_score;
                    existing.delta_validation_passed = validation.is_valid;
                    existing.missing_delta_fields = validation.missing_fields.clone();
                    existing.status = status;
                    info!(dedup_key = %dedup_key, "event upgraded to complete delta");
                }
                self.store
                    .update_event(&existing)
                    .await
                    .with_context(|| format!("updating event {dedup_key}"))?;
            } else {
                debug!(dedup_key = %dedup_key, article_id, "article already linked to event");
            }
            counter!("events_updated_total").increment(1);
            return Ok(EventOutcome {
                event_id: existing.id,
                dedup_key,
                is_new: false,
                status: existing.status,
            });
        }

        let event = RegulatoryEvent {
            id: String::new(),
            dedup_key: dedup_key.clone(),
            event_type: detection.event_type,
            primary_regulation: detection.primary_regulation.clone(),
            affected_regulations: detection.affected_regulations.clone(),
            lifecycle_state: detection.lifecycle_state,
            quarter,
            title: detection.title.clone(),
            summary: detection.summary.clone(),
            event_date_earliest: event_date,
            event_date_latest: event_date,
            source_article_ids: vec![article_id.to_string()],
            narrative: detection.narrative.clone(),
            confidence_level: detection.confidence_level,
            status,
            completeness_score: validation.completeness_score,
            delta_validation_passed: validation.is_valid,
            missing_delta_fields: validation.missing_fields,
        };
        let stored = self
            .store
            .insert_event(event)
            .await
            .with_context(|| format!("inserting event {dedup_key}"))?;

        counter!("events_created_total").increment(1);
        info!(
            dedup_key = %dedup_key,
            event_id = %stored.id,
            status = ?stored.status,
            "regulatory event created"
        );
        Ok(EventOutcome {
            event_id: stored.id,
            dedup_key,
            is_new: true,
            status: stored.status,
        })
    }

    pub async fn stats(&self) -> Result<EventStats> {
        let events = self.store.all_events().await?;
        Ok(EventStats::from_events(&events))
    }
}
