use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use strata_artifact::{
    Analysis, Concern, Conclusion, ConclusionVerdict, Finding, FindingId, FindingStatus, Hypothesis, Payload, Report,
    TagSet, Verdict, VerificationReport,
};
use strata_dispatch::{TaskKind, TaskSpec, Worker, WorkerError};

#[derive(Debug, Default)]
struct Script {
    hypotheses: BTreeMap<String, Vec<Hypothesis>>,
    verdicts: BTreeMap<String, Verdict>,
    concerns: BTreeMap<String, Vec<Concern>>,
    statuses: BTreeMap<String, FindingStatus>,
    transient: Vec<(String, u32)>,
    fatal: Vec<String>,
}

/// Deterministic worker
///
/// - analyze: one conclusion per input file, id `<focus>:<path>`
/// - verify: every prior conclusion VERIFIED unless a verdict is scripted
/// - synthesize: the hypotheses scripted for the task's focus area
/// - investigate: a finding for the hypothesis, CONFIRMED unless a status is
///   scripted for its condition
///
/// Every task is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    script: Mutex<Script>,
    calls: Mutex<Vec<TaskSpec>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hypotheses proposed for `focus`
    pub fn propose(&self, focus: &str, hypotheses: Vec<Hypothesis>) {
        self.script.lock().hypotheses.insert(focus.to_string(), hypotheses);
    }

    /// Verdict for one conclusion id
    pub fn verdict(&self, conclusion_id: &str, verdict: Verdict) {
        self.script.lock().verdicts.insert(conclusion_id.to_string(), verdict);
    }

    /// New concern raised when verifying `focus`
    pub fn concern(&self, focus: &str, concern: Concern) {
        self.script.lock().concerns.entry(focus.to_string()).or_default().push(concern);
    }

    /// Investigation outcome for hypotheses with `condition`
    pub fn status(&self, condition: &str, status: FindingStatus) {
        self.script.lock().statuses.insert(condition.to_string(), status);
    }

    /// Fail units whose id contains `pattern` with a retryable error, `times` times
    pub fn fail_transient(&self, pattern: &str, times: u32) {
        self.script.lock().transient.push((pattern.to_string(), times));
    }

    /// Fail units whose id contains `pattern` fatally until cleared
    pub fn fail_fatal(&self, pattern: &str) {
        self.script.lock().fatal.push(pattern.to_string());
    }

    /// Clear injected failures
    pub fn heal(&self) {
        let mut script = self.script.lock();
        script.transient.clear();
        script.fatal.clear();
    }

    /// Tasks executed so far, in call order
    pub fn tasks(&self) -> Vec<TaskSpec> {
        self.calls.lock().clone()
    }

    /// Tasks of one kind
    pub fn tasks_of(&self, kind: TaskKind) -> Vec<TaskSpec> {
        self.calls.lock().iter().filter(|t| t.kind == kind).cloned().collect()
    }

    /// Invocation count per kind
    pub fn calls(&self, kind: TaskKind) -> usize {
        self.calls.lock().iter().filter(|t| t.kind == kind).count()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn injected_failure(&self, unit: &str) -> Option<WorkerError> {
        let mut script = self.script.lock();
        if script.fatal.iter().any(|p| unit.contains(p.as_str())) {
            return Some(WorkerError::Malformed(format!("scripted fatal failure for {unit}")));
        }
        for (pattern, remaining) in &mut script.transient {
            if *remaining > 0 && unit.contains(pattern.as_str()) {
                *remaining -= 1;
                return Some(WorkerError::Transient(format!("scripted transient failure for {unit}")));
            }
        }
        None
    }

    fn analyze(task: &TaskSpec) -> Payload {
        let focus = task.focus.clone().unwrap_or_default();
        let conclusions = task
            .inputs
            .iter()
            .map(|slice| Conclusion {
                id: format!("{focus}:{}", slice.path),
                statement: format!("{} reviewed", slice.path),
                files: vec![slice.path.clone()],
            })
            .collect();
        Payload::Analysis(Analysis {
            summary: format!("{focus}: {} inputs", task.inputs.len()),
            conclusions,
        })
    }

    fn verify(&self, task: &TaskSpec) -> Payload {
        let focus = task.focus.clone().unwrap_or_default();
        let script = self.script.lock();
        let verdicts = task.context["prior"]["conclusions"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|c| c["id"].as_str())
            .map(|id| ConclusionVerdict {
                conclusion_id: id.to_string(),
                verdict: script.verdicts.get(id).cloned().unwrap_or(Verdict::Verified),
            })
            .collect();
        Payload::Verification(VerificationReport {
            new_concerns: script.concerns.get(&focus).cloned().unwrap_or_default(),
            focus,
            verdicts,
            carried: Vec::new(),
        })
    }

    fn synthesize(&self, task: &TaskSpec) -> Payload {
        let focus = task.focus.clone().unwrap_or_default();
        Payload::Hypotheses(self.script.lock().hypotheses.get(&focus).cloned().unwrap_or_default())
    }

    fn investigate(&self, task: &TaskSpec) -> Result<Payload, WorkerError> {
        let hyp: Hypothesis = serde_json::from_value(task.context["hypothesis"].clone())
            .map_err(|e| WorkerError::Malformed(e.to_string()))?;
        let status = self
            .script
            .lock()
            .statuses
            .get(&hyp.condition)
            .copied()
            .unwrap_or(FindingStatus::Confirmed);
        Ok(Payload::Finding(Finding {
            id: FindingId(String::new()),
            hypothesis: hyp.id.clone(),
            status,
            severity: hyp.severity_hint,
            condition: hyp.condition.clone(),
            title: hyp.title.clone(),
            location: hyp.location.clone(),
            evidence: format!("scripted evidence for {}", hyp.condition),
            evolution: None,
            persistent: false,
        }))
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn execute(&self, task: &TaskSpec) -> Result<Report, WorkerError> {
        self.calls.lock().push(task.clone());
        if let Some(error) = self.injected_failure(task.unit.as_str()) {
            return Err(error);
        }
        let payload = match task.kind {
            TaskKind::Analyze => Self::analyze(task),
            TaskKind::Verify => self.verify(task),
            TaskKind::Synthesize => self.synthesize(task),
            TaskKind::Investigate => self.investigate(task)?,
        };
        Ok(Report::new(task.unit.clone(), TagSet::new(), payload))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Count of recorded tasks per unit id, for idempotence checks
pub fn calls_per_unit(tasks: &[TaskSpec]) -> HashMap<String, usize> {
    let mut out = HashMap::new();
    for task in tasks {
        *out.entry(task.unit.as_str().to_string()).or_default() += 1;
    }
    out
}
