//! Logout equipment check: four slots that must all be answered before the
//! feedback can be submitted.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Equipment {
    Computer,
    Mouse,
    Keyboard,
    Monitor,
}

impl Equipment {
    pub const ALL: [Equipment; 4] = [
        Equipment::Computer,
        Equipment::Mouse,
        Equipment::Keyboard,
        Equipment::Monitor,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Equipment::Computer => "computer",
            Equipment::Mouse => "mouse",
            Equipment::Keyboard => "keyboard",
            Equipment::Monitor => "monitor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Equipment::Computer => "Computer",
            Equipment::Mouse => "Mouse",
            Equipment::Keyboard => "Keyboard",
            Equipment::Monitor => "Monitor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotAnswer {
    #[default]
    Unanswered,
    Working,
    Issue(String),
}

impl SlotAnswer {
    /// An issue only counts once it has a description.
    pub fn is_complete(&self) -> bool {
        match self {
            SlotAnswer::Unanswered => false,
            SlotAnswer::Working => true,
            SlotAnswer::Issue(desc) => !desc.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Condition {
    #[serde(rename = "Good")]
    Good,
    #[serde(rename = "Not Working")]
    NotWorking,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Good => "Good",
            Condition::NotWorking => "Not Working",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    #[error("please answer every equipment item ({completed}/4 complete)")]
    Incomplete { completed: usize },
    #[error("invalid status for {slot}: {value}")]
    BadStatus { slot: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedbackForm {
    computer: SlotAnswer,
    mouse: SlotAnswer,
    keyboard: SlotAnswer,
    monitor: SlotAnswer,
    pub additional_comments: String,
}

/// What gets stored once the gate opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub computer: Condition,
    pub mouse: Condition,
    pub keyboard: Condition,
    pub monitor: Condition,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatus {
    pub completed: usize,
    pub total: usize,
    pub progress: usize,
    pub can_submit: bool,
}

impl FeedbackForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, e: Equipment) -> &SlotAnswer {
        match e {
            Equipment::Computer => &self.computer,
            Equipment::Mouse => &self.mouse,
            Equipment::Keyboard => &self.keyboard,
            Equipment::Monitor => &self.monitor,
        }
    }

    pub fn set(&mut self, e: Equipment, answer: SlotAnswer) {
        let slot = match e {
            Equipment::Computer => &mut self.computer,
            Equipment::Mouse => &mut self.mouse,
            Equipment::Keyboard => &mut self.keyboard,
            Equipment::Monitor => &mut self.monitor,
        };
        *slot = answer;
    }

    pub fn completed_count(&self) -> usize {
        Equipment::ALL
            .iter()
            .filter(|e| self.slot(**e).is_complete())
            .count()
    }

    pub fn progress_percent(&self) -> usize {
        self.completed_count() * 100 / Equipment::ALL.len()
    }

    pub fn can_submit(&self) -> bool {
        self.completed_count() == Equipment::ALL.len()
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            completed: self.completed_count(),
            total: Equipment::ALL.len(),
            progress: self.progress_percent(),
            can_submit: self.can_submit(),
        }
    }

    pub fn submission(&self) -> Result<Submission, GateError> {
        if !self.can_submit() {
            return Err(GateError::Incomplete {
                completed: self.completed_count(),
            });
        }
        let condition = |e: Equipment| match self.slot(e) {
            SlotAnswer::Issue(_) => Condition::NotWorking,
            _ => Condition::Good,
        };

        // Stored comment order is fixed: computer, monitor, keyboard, mouse.
        let mut parts = Vec::new();
        for e in [
            Equipment::Computer,
            Equipment::Monitor,
            Equipment::Keyboard,
            Equipment::Mouse,
        ] {
            if let SlotAnswer::Issue(desc) = self.slot(e) {
                let desc = desc.trim();
                if !desc.is_empty() {
                    parts.push(format!("{}: {}", e.label(), desc));
                }
            }
        }
        let extra = self.additional_comments.trim();
        if !extra.is_empty() {
            parts.push(format!("Additional: {}", extra));
        }

        Ok(Submission {
            computer: condition(Equipment::Computer),
            mouse: condition(Equipment::Mouse),
            keyboard: condition(Equipment::Keyboard),
            monitor: condition(Equipment::Monitor),
            comments: if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            },
        })
    }

    /// Reads the client's form shape: each slot is
    /// `{status: "yes" | "no" | null, issue: string}`.
    pub fn from_json(v: &serde_json::Value) -> Result<Self, GateError> {
        let mut form = FeedbackForm::new();
        for e in Equipment::ALL {
            let slot = v.get(e.key());
            let status = slot.and_then(|s| s.get("status"));
            let issue = slot
                .and_then(|s| s.get("issue"))
                .and_then(|i| i.as_str())
                .unwrap_or("")
                .to_string();
            let answer = match status {
                None | Some(serde_json::Value::Null) => SlotAnswer::Unanswered,
                Some(serde_json::Value::String(s)) if s == "yes" => SlotAnswer::Working,
                Some(serde_json::Value::String(s)) if s == "no" => SlotAnswer::Issue(issue),
                Some(other) => {
                    return Err(GateError::BadStatus {
                        slot: e.key(),
                        value: other.to_string(),
                    })
                }
            };
            form.set(e, answer);
        }
        form.additional_comments = v
            .get("additionalComments")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();
        Ok(form)
    }
}
