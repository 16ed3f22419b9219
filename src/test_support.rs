use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use worksync_rs::extract::{Page, RecordSource, SourceError, SourceProbe};
use worksync_rs::temporal::Interval;

/// Raw allocation row as the source would send it
#[allow(dead_code)]
pub fn raw_allocation(
    entity: &str,
    actor: &str,
    category: &str,
    minutes: i64,
    occurred_at: i64,
) -> serde_json::Value {
    serde_json::json!({
        "entity_id": entity,
        "actor_id": actor,
        "category": category,
        "role": "engineer",
        "minutes": minutes,
        "occurred_at": occurred_at,
    })
}

/// Raw usage row as the source would send it
#[allow(dead_code)]
pub fn raw_usage(
    entity: &str,
    actor: &str,
    uid: &str,
    minutes: i64,
    occurred_at: i64,
) -> serde_json::Value {
    serde_json::json!({
        "entity_id": entity,
        "actor_id": actor,
        "uid": uid,
        "minutes": minutes,
        "occurred_at": occurred_at,
    })
}

/// Raw entity dimension row carrying the declared total allocation
#[allow(dead_code)]
pub fn raw_entity(entity: &str, total_minutes: i64) -> serde_json::Value {
    serde_json::json!({
        "entity_id": entity,
        "minutes": total_minutes,
        "occurred_at": 0,
    })
}

/// Generate a seeded batch of usage rows spread across a window
#[allow(dead_code)]
pub fn generate_usage_rows(
    count: u32,
    window: Interval,
    seed: u64,
) -> Vec<serde_json::Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    let entities = ["E1", "E2", "E3", "E4", "E5"];
    let actors = ["A1", "A2", "A3"];

    (0..count)
        .map(|i| {
            let entity = entities[rng.gen_range(0..entities.len())];
            let actor = actors[rng.gen_range(0..actors.len())];
            let occurred_at = rng.gen_range(window.start..window.end);
            raw_usage(
                entity,
                actor,
                &format!("w-{i}"),
                rng.gen_range(5..240),
                occurred_at,
            )
        })
        .collect()
}

/// How the scripted source answers its row-count probe
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum ProbeScript {
    /// Report the true number of scripted rows
    Honest,
    /// Report a fixed count regardless of the scripted rows
    Fixed(u64),
    /// Fail the probe
    Unreachable,
}

/// A scriptable in-memory source for exercising the pipeline: serves a row
/// set page by page, can fail at a chosen page, and its probe behavior is
/// configurable independently of its fetch behavior.
#[allow(dead_code)]
pub struct ScriptedSource {
    pub rows: Vec<serde_json::Value>,
    pub fail_fetch: bool,
    pub fail_on_page: Option<u64>,
    pub probe: ProbeScript,
    pages_served: u64,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn serving(rows: Vec<serde_json::Value>) -> Self {
        Self {
            rows,
            fail_fetch: false,
            fail_on_page: None,
            probe: ProbeScript::Honest,
            pages_served: 0,
        }
    }

    /// A source that is down: every fetch and every probe fails
    pub fn unreachable() -> Self {
        Self {
            rows: Vec::new(),
            fail_fetch: true,
            fail_on_page: None,
            probe: ProbeScript::Unreachable,
            pages_served: 0,
        }
    }

    pub fn with_probe(mut self, probe: ProbeScript) -> Self {
        self.probe = probe;
        self
    }

    pub fn failing_on_page(mut self, page: u64) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    /// Rows whose occurred_at falls in the window
    fn rows_in_window(&self, window: Interval) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .filter(|row| {
                row.get("occurred_at")
                    .and_then(worksync_rs::temporal::parse_instant)
                    .map(|at| window.contains(at))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

impl RecordSource for ScriptedSource {
    fn fetch_page(
        &mut self,
        window: Interval,
        offset: u64,
        limit: u64,
    ) -> Result<Page, SourceError> {
        if self.fail_fetch {
            return Err(SourceError::Unreachable("scripted outage".to_string()));
        }
        if self.fail_on_page == Some(self.pages_served) {
            return Err(SourceError::Timeout("scripted page failure".to_string()));
        }
        self.pages_served += 1;

        let matching = self.rows_in_window(window);
        let start = (offset as usize).min(matching.len());
        let end = ((offset + limit) as usize).min(matching.len());
        Ok(Page {
            has_more: end < matching.len(),
            rows: matching[start..end].to_vec(),
        })
    }

    fn probe(&mut self, window: Interval) -> Result<SourceProbe, SourceError> {
        match &self.probe {
            ProbeScript::Honest => Ok(SourceProbe {
                row_count: self.rows_in_window(window).len() as u64,
            }),
            ProbeScript::Fixed(count) => Ok(SourceProbe { row_count: *count }),
            ProbeScript::Unreachable => {
                Err(SourceError::Unreachable("scripted probe outage".to_string()))
            }
        }
    }
}
