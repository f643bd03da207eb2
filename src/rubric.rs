use crate::error::DomainError;
use serde::{Deserialize, Serialize};

pub const SCORE_STEP: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub name: String,
    pub max_points: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub comments: String,
}

impl Criterion {
    pub fn new(name: &str, max_points: f64) -> Self {
        Self {
            name: name.to_string(),
            max_points,
            score: 0.0,
            comments: String::new(),
        }
    }

    /// Every write goes through here so the score never leaves `[0, max_points]`.
    pub fn set_score(&mut self, score: f64) {
        self.score = if score.is_finite() {
            score.clamp(0.0, self.max_points)
        } else {
            0.0
        };
    }

    pub fn increment(&mut self) {
        self.set_score(self.score + SCORE_STEP);
    }

    pub fn decrement(&mut self) {
        self.set_score(self.score - SCORE_STEP);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            criteria: vec![
                Criterion::new("Contenu et exactitude", 8.0),
                Criterion::new("Méthodologie", 6.0),
                Criterion::new("Présentation et clarté", 4.0),
                Criterion::new("Respect des consignes", 2.0),
            ],
        }
    }
}

impl Rubric {
    /// Builds a rubric from caller-supplied criteria, clamping the given scores.
    pub fn from_criteria(criteria: Vec<Criterion>) -> Result<Self, DomainError> {
        if criteria.is_empty() {
            return Err(DomainError::new("bad_params", "criteria must not be empty"));
        }
        let mut out = Vec::with_capacity(criteria.len());
        for (i, c) in criteria.into_iter().enumerate() {
            let name = c.name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::new("bad_params", "criterion name must not be empty")
                    .with_details(serde_json::json!({ "index": i })));
            }
            if !c.max_points.is_finite() || c.max_points <= 0.0 {
                return Err(DomainError::new(
                    "bad_params",
                    format!("criterion {} must have positive maxPoints", name),
                )
                .with_details(serde_json::json!({ "index": i })));
            }
            let mut criterion = Criterion {
                name,
                max_points: c.max_points,
                score: 0.0,
                comments: c.comments,
            };
            criterion.set_score(c.score);
            out.push(criterion);
        }
        Ok(Self { criteria: out })
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut Criterion, DomainError> {
        self.criteria
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| DomainError::new("not_found", format!("unknown criterion: {}", name)))
    }

    pub fn set_score(&mut self, name: &str, score: f64) -> Result<(), DomainError> {
        self.find_mut(name)?.set_score(score);
        Ok(())
    }

    pub fn increment(&mut self, name: &str) -> Result<(), DomainError> {
        self.find_mut(name)?.increment();
        Ok(())
    }

    pub fn decrement(&mut self, name: &str) -> Result<(), DomainError> {
        self.find_mut(name)?.decrement();
        Ok(())
    }

    pub fn max_total(&self) -> f64 {
        self.criteria.iter().map(|c| c.max_points).sum()
    }

    pub fn total(&self) -> f64 {
        let sum: f64 = self.criteria.iter().map(|c| c.score).sum();
        sum.min(self.max_total())
    }

    pub fn percentage(&self) -> f64 {
        let max = self.max_total();
        if max <= 0.0 {
            return 0.0;
        }
        100.0 * self.total() / max
    }

    /// Global comment first, then one `name: comment` per annotated criterion,
    /// separated by blank lines.
    pub fn combined_comments(&self, global: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !global.trim().is_empty() {
            parts.push(global.to_string());
        }
        for c in &self.criteria {
            if !c.comments.trim().is_empty() {
                parts.push(format!("{}: {}", c.name, c.comments));
            }
        }
        parts.join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increment,
    Decrement,
}

impl Adjustment {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increment" | "+" => Some(Self::Increment),
            "decrement" | "-" => Some(Self::Decrement),
            _ => None,
        }
    }
}
