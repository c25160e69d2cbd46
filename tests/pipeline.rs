//! End-to-end pipeline runs against fake collaborators on temp trees.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use uplifter::config::Config;
use uplifter::engine::CancelFlag;
use uplifter::error::RemoteFailure;
use uplifter::events::{EventBus, EventType};
use uplifter::pipeline::{Collaborators, Pipeline};
use uplifter::rag::NoGuidance;
use uplifter::traits::{CompletionBackend, CompletionRequest, FindingsSource};
use uplifter_core::chunk::Chunker;
use uplifter_core::language::Language;
use uplifter_core::models::{Decision, FileState, NO_CHANGE_NEEDED};

// ═══════════════════════════════════════════════════════════════════════
// Fakes
// ═══════════════════════════════════════════════════════════════════════

struct FixedFindings(&'static str);

#[async_trait]
impl FindingsSource for FixedFindings {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn analyze(&self, _path: &Path, _code: &str, _target_version: &str) -> String {
        self.0.to_string()
    }
}

/// Answers every prompt with `transform(shown code)` in the tagged reply
/// format. Optionally trips a cancel flag on the `cancel_on`-th call.
struct ScriptedModel {
    transform: fn(&str) -> String,
    calls: AtomicUsize,
    cancel_on: Option<(usize, CancelFlag)>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(transform: fn(&str) -> String) -> Self {
        Self {
            transform,
            calls: AtomicUsize::new(0),
            cancel_on: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

fn shown_code(prompt: &str) -> String {
    let start = prompt
        .rfind("```python\n")
        .map(|i| i + "```python\n".len())
        .unwrap_or(0);
    let rest = &prompt[start..];
    rest[..rest.rfind("\n```").unwrap_or(rest.len())].to_string()
}

#[async_trait]
impl CompletionBackend for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteFailure> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if let Some((at, cancel)) = &self.cancel_on {
            if n == *at {
                cancel.cancel();
            }
        }
        let code = (self.transform)(&shown_code(&request.prompt));
        Ok(format!(
            "<change_summary>\n- modernized\n</change_summary>\n<updated_code>\n```python\n{code}\n```\n</updated_code>"
        ))
    }
}

struct Harness {
    pipeline: Pipeline,
    events: EventBus,
}

fn harness(root: &Path, completion: Arc<dyn CompletionBackend>, cancel: CancelFlag, tweak: fn(&mut Config)) -> Harness {
    let mut config = Config::minimal("3.9", Language::Python);
    config.run.root = root.to_path_buf();
    tweak(&mut config);
    let collaborators = Collaborators {
        findings: Arc::new(FixedFindings(FINDINGS)),
        guidance: Arc::new(NoGuidance::new("test")),
        completion,
    };
    let events = EventBus::default();
    let pipeline = Pipeline::new(config, collaborators, events.clone(), cancel).unwrap();
    Harness { pipeline, events }
}

fn no_tweak(_: &mut Config) {}

const FINDINGS: &str = "Static analysis for Python 3.9:\n\
- Python 2 print statements (lines 5)\n\
- dict.has_key() is removed, use `in` (lines 2)\n\
- xrange() is removed, use range() (lines 4)";

const SCRIPT_A: &str = "#!/usr/bin/env python\nimport sys\ndef main():\n    name = sys.argv[1]\n    print \"hi\", name\nmain()\n";

// ═══════════════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_print_migration_accepted_and_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.py");
    std::fs::write(&path, SCRIPT_A).unwrap();

    let model = Arc::new(ScriptedModel::new(|code| code.replace("print \"hi\", name", "print(\"hi\", name)")));
    let h = harness(dir.path(), model, CancelFlag::new(), no_tweak);
    let report = h.pipeline.run().await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.decision, Decision::Accepted, "{:?}", outcome.reasons);
    assert_eq!(outcome.final_state, FileState::Accepted);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "#!/usr/bin/env python\nimport sys\ndef main():\n    name = sys.argv[1]\n    print(\"hi\", name)\nmain()\n"
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("hello.py.backup")).unwrap(), SCRIPT_A);
    assert_eq!(report.totals.accepted, 1);
}

#[tokio::test]
async fn test_truncated_reply_falls_back_and_is_never_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.py");
    std::fs::write(&path, SCRIPT_A).unwrap();

    let model = Arc::new(ScriptedModel::new(|code| {
        format!("{}\n# ... (other methods unchanged)", code.lines().take(3).collect::<Vec<_>>().join("\n"))
    }));
    let h = harness(dir.path(), model, CancelFlag::new(), no_tweak);
    let report = h.pipeline.run().await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.chunks[0].source.to_string(), "fallback(truncated)");
    assert_eq!(outcome.decision, Decision::Accepted, "{:?}", outcome.reasons);
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(!written.contains("unchanged"));
    assert!(written.contains("print(\"hi\", name)"));
    assert_eq!(report.totals.fallback_chunks, 1);
}

#[tokio::test]
async fn test_unsafe_reply_rejected_and_original_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tool.py");
    let original = "import os\n\n\
def walk(root):\n    \"\"\"List every file below root.\"\"\"\n    found = []\n    for base, dirs, files in os.walk(root):\n        for name in files:\n            found.append(os.path.join(base, name))\n    return sorted(found)\n\n\
def one():\n    return 1\n";
    std::fs::write(&path, original).unwrap();

    let model = Arc::new(ScriptedModel::new(|code| code.replace("\n\ndef one():\n    return 1", "")));
    let h = harness(dir.path(), model, CancelFlag::new(), no_tweak);
    let mut rx = h.events.subscribe();
    let report = h.pipeline.run().await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.decision, Decision::Rejected);
    assert_eq!(outcome.final_state, FileState::Rejected);
    assert!(outcome
        .reasons
        .contains(&"function definitions reduced from 2 to 1".to_string()));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    assert_eq!(std::fs::read_to_string(dir.path().join("tool.py.backup")).unwrap(), original);

    let mut rejection = None;
    while let Ok(event) = rx.try_recv() {
        if event.stage == "validation" && event.kind == EventType::Status {
            rejection = Some(event);
        }
    }
    let rejection = rejection.expect("rejection event");
    let reasons: Vec<String> = serde_json::from_value(rejection.payload["reasons"].clone()).unwrap();
    assert!(reasons.contains(&"function definitions reduced from 2 to 1".to_string()));
}

#[tokio::test]
async fn test_cancel_mid_file_preserves_it_and_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.py");
    let second = dir.path().join("b.py");
    let third = dir.path().join("c.py");
    std::fs::write(&first, SCRIPT_A).unwrap();
    let big: String = (0..40)
        .map(|i| format!("def f{i}(x):\n    return x + {i}  # keep the body a little longer than a one-liner\n\n"))
        .collect();
    std::fs::write(&second, &big).unwrap();
    std::fs::write(&third, SCRIPT_A).unwrap();

    let cancel = CancelFlag::new();
    let model = Arc::new(ScriptedModel {
        cancel_on: Some((3, cancel.clone())),
        ..ScriptedModel::new(|code| code.replace("print \"hi\", name", "print(\"hi\", name)"))
    });
    let h = harness(dir.path(), model.clone(), cancel, |c| c.budget.max_total_tokens = 3200);
    let report = h.pipeline.run().await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].decision, Decision::Accepted);
    assert_eq!(report.outcomes[1].decision, Decision::Canceled);
    assert_eq!(report.outcomes[1].final_state, FileState::Canceled);
    assert_eq!(report.not_started, vec![third.clone()]);

    // b.py: the in-flight chunk finished, nothing after it was requested.
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read_to_string(&second).unwrap(), big);
    assert_eq!(std::fs::read_to_string(&third).unwrap(), SCRIPT_A);
    assert!(!dir.path().join("c.py.backup").exists());
    assert_eq!(report.totals.canceled, 1);
}

#[tokio::test]
async fn test_cancel_during_last_chunk_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("two.py");
    let src: String = (0..6)
        .map(|i| format!("def g{i}(x):\n    return x * {i}  # a body long enough to need a second chunk\n\n"))
        .collect();
    std::fs::write(&path, &src).unwrap();

    let mut config = Config::minimal("3.9", Language::Python);
    config.budget.max_total_tokens = 3200;
    let chunk_count = Chunker::new(Language::Python, config.budget.chunk_budget()).chunk(&src).len();
    assert!(chunk_count >= 2);

    let cancel = CancelFlag::new();
    let model = Arc::new(ScriptedModel {
        cancel_on: Some((chunk_count, cancel.clone())),
        ..ScriptedModel::new(|code| code.replace("x * ", "x*"))
    });
    let h = harness(dir.path(), model.clone(), cancel, |c| c.budget.max_total_tokens = 3200);
    let report = h.pipeline.run().await.unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), chunk_count);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.decision, Decision::Canceled);
    assert_eq!(outcome.final_state, FileState::Canceled);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), src);
    assert_eq!(report.totals.accepted, 0);
}

#[tokio::test]
async fn test_cancel_during_single_chunk_file_leaves_it_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.py");
    std::fs::write(&path, SCRIPT_A).unwrap();

    let cancel = CancelFlag::new();
    let model = Arc::new(ScriptedModel {
        cancel_on: Some((1, cancel.clone())),
        ..ScriptedModel::new(|code| code.replace("print \"hi\", name", "print(\"hi\", name)"))
    });
    let h = harness(dir.path(), model, cancel, no_tweak);
    let report = h.pipeline.run().await.unwrap();

    assert_eq!(report.outcomes[0].decision, Decision::Canceled);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), SCRIPT_A);
}

#[tokio::test]
async fn test_fallback_only_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.py");
    std::fs::write(
        &path,
        "def lookup(d, k):\n    if d.has_key(k):\n        print d[k]\n    for i in xrange(3):\n        pass\n",
    )
    .unwrap();

    let model = Arc::new(ScriptedModel::new(|c| c.to_string()));
    let h = harness(dir.path(), model.clone(), CancelFlag::new(), |c| c.run.fallback_only = true);
    let report = h.pipeline.run().await.unwrap();
    assert_eq!(report.outcomes[0].decision, Decision::Accepted, "{:?}", report.outcomes[0].reasons);
    let once = std::fs::read_to_string(&path).unwrap();
    assert!(once.contains("(k in d)"));
    assert!(once.contains("print(d[k])"));
    assert!(once.contains("range(3)"));

    let report = h.pipeline.run().await.unwrap();
    let outcome = report
        .outcomes
        .iter()
        .find(|o| o.path == path)
        .unwrap();
    assert_eq!(outcome.decision, Decision::Unchanged);
    assert_eq!(outcome.reason, NO_CHANGE_NEEDED);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), once);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreadable_file_is_errored_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), [0xff, 0xfe, 0x00, 0x41]).unwrap();
    std::fs::write(dir.path().join("b.py"), SCRIPT_A).unwrap();

    let model = Arc::new(ScriptedModel::new(|code| code.replace("print \"hi\", name", "print(\"hi\", name)")));
    let h = harness(dir.path(), model, CancelFlag::new(), no_tweak);
    let report = h.pipeline.run().await.unwrap();

    assert_eq!(report.outcomes[0].decision, Decision::Errored);
    assert_eq!(report.outcomes[0].final_state, FileState::Errored);
    assert_eq!(report.outcomes[1].decision, Decision::Accepted);
    assert!(report.halted.is_none());
}

#[tokio::test]
async fn test_summary_written_to_summary_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.py"), SCRIPT_A).unwrap();
    let logs = tempfile::tempdir().unwrap();
    let mut config = Config::minimal("3.9", Language::Python);
    config.run.root = dir.path().to_path_buf();
    config.run.fallback_only = true;
    config.run.summary_dir = Some(logs.path().to_path_buf());

    let collaborators = Collaborators::from_config(&config).unwrap();
    let pipeline = Pipeline::new(config, collaborators, EventBus::default(), CancelFlag::new()).unwrap();
    pipeline.run().await.unwrap();

    let written: Vec<_> = std::fs::read_dir(logs.path()).unwrap().collect();
    assert_eq!(written.len(), 1);
}
