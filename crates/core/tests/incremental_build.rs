use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use buildlink_core::compiler::{
    BatchCompiler, CompileOutcome, CompileTask, CompiledFile, Diagnostic, Severity,
};
use buildlink_core::model::GlobalConfig;
use buildlink_core::util::mtime_millis;
use buildlink_core::{BuildService, MessageHandler};
use buildlink_proto::{BuildType, CompileMessage, ExitCode};
use tokio_util::sync::CancellationToken;

/// Compiles by touching a `.class` file per source. Optionally fails
/// sources whose file name contains a marker, so partial-progress behavior
/// can be observed.
#[derive(Default)]
struct MockCompiler {
    invocations: AtomicUsize,
    compiled: Mutex<Vec<PathBuf>>,
    fail_marker: Option<String>,
}

impl MockCompiler {
    fn failing(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    fn take_compiled(&self) -> Vec<PathBuf> {
        std::mem::take(&mut self.compiled.lock().unwrap())
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl BatchCompiler for MockCompiler {
    fn compile(
        &self,
        task: &CompileTask,
        diagnostics: &mut dyn FnMut(Diagnostic),
    ) -> buildlink_core::Result<CompileOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let mut outcome = CompileOutcome {
            compiled: Vec::new(),
            success: true,
        };

        for group in &task.groups {
            std::fs::create_dir_all(&group.output_dir).unwrap();
            for source in &group.sources {
                let name = source.file_name().unwrap().to_string_lossy().into_owned();
                if self
                    .fail_marker
                    .as_ref()
                    .is_some_and(|marker| name.contains(marker))
                {
                    diagnostics(Diagnostic {
                        severity: Severity::Error,
                        text: format!("cannot compile {name}"),
                        source_path: Some(source.clone()),
                        line: Some(1),
                        column: None,
                    });
                    outcome.success = false;
                    continue;
                }

                let stem = source.file_stem().unwrap().to_string_lossy().into_owned();
                let output = group.output_dir.join(format!("{stem}.class"));
                std::fs::write(&output, b"class").unwrap();
                self.compiled.lock().unwrap().push(source.clone());
                outcome.compiled.push(CompiledFile {
                    source: source.clone(),
                    outputs: vec![output],
                });
            }
        }

        Ok(outcome)
    }
}

#[derive(Default)]
struct CollectingHandler {
    messages: Mutex<Vec<CompileMessage>>,
}

impl MessageHandler for CollectingHandler {
    fn compile_message(&self, message: CompileMessage) {
        self.messages.lock().unwrap().push(message);
    }

    fn progress(&self, _text: &str) {}
}

struct Fixture {
    _dir: tempfile::TempDir,
    project: PathBuf,
    service: BuildService,
    compiler: Arc<MockCompiler>,
}

impl Fixture {
    fn new(compiler: MockCompiler) -> Self {
        Self::with_project(
            compiler,
            r#"{
                "name": "demo",
                "modules": [
                    {"name": "app", "source_roots": ["src"], "output": "out"}
                ]
            }"#,
            &[("src/A.java", "class A {}")],
        )
    }

    fn with_project(compiler: MockCompiler, config: &str, sources: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let project = project.canonicalize().unwrap();
        std::fs::write(project.join("project.json"), config).unwrap();
        for (path, text) in sources {
            let full = project.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, text).unwrap();
        }

        let compiler = Arc::new(compiler);
        let service = BuildService::new(
            dir.path().join("data"),
            Arc::clone(&compiler) as Arc<dyn BatchCompiler>,
        );
        Self {
            _dir: dir,
            project,
            service,
            compiler,
        }
    }

    async fn build(&self, build_type: BuildType) -> ExitCode {
        self.build_scoped(build_type, &[]).await
    }

    async fn build_scoped(&self, build_type: BuildType, modules: &[String]) -> ExitCode {
        self.service
            .start_build(
                &self.project,
                modules,
                build_type,
                Arc::new(CollectingHandler::default()),
                CancellationToken::new(),
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn make_is_idempotent_when_nothing_changed() {
    let fixture = Fixture::new(MockCompiler::default());

    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Ok);
    assert_eq!(fixture.compiler.take_compiled().len(), 1);

    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Ok);
    assert!(fixture.compiler.take_compiled().is_empty());
    // An empty candidate set never reaches the compiler at all.
    assert_eq!(fixture.compiler.invocations(), 1);
}

#[tokio::test]
async fn dirty_file_is_recompiled_and_restamped() {
    let fixture = Fixture::new(MockCompiler::default());
    fixture.build(BuildType::Make).await;
    fixture.compiler.take_compiled();

    let source = fixture.project.join("src/A.java");
    std::fs::write(&source, "class A { int x; }").unwrap();
    fixture.service.notify_file_changed(&fixture.project, &source);

    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Ok);
    assert_eq!(fixture.compiler.take_compiled(), vec![source.clone()]);

    let descriptor = fixture.service.cached_descriptor(&fixture.project).unwrap();
    assert_eq!(
        descriptor.data.timestamps.stamp("java", &source),
        Some(mtime_millis(&source).unwrap())
    );
}

#[tokio::test]
async fn set_globals_evicts_every_cached_project() {
    let fixture = Fixture::new(MockCompiler::default());
    fixture.build(BuildType::Make).await;

    let before = fixture.service.cached_descriptor(&fixture.project).unwrap();
    assert_eq!(fixture.service.cached_project_count(), 1);

    fixture.service.set_globals(GlobalConfig::default());
    assert_eq!(fixture.service.cached_project_count(), 0);
    assert!(fixture.service.cached_descriptor(&fixture.project).is_none());

    fixture.build(BuildType::Make).await;
    let after = fixture.service.cached_descriptor(&fixture.project).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn rebuild_recompiles_everything() {
    let fixture = Fixture::new(MockCompiler::default());
    fixture.build(BuildType::Make).await;
    fixture.compiler.take_compiled();

    assert_eq!(fixture.build(BuildType::Rebuild).await, ExitCode::Ok);
    assert_eq!(fixture.compiler.take_compiled().len(), 1);
}

#[tokio::test]
async fn forced_compilation_ignores_timestamps_but_honors_scope() {
    let config = r#"{
        "name": "demo",
        "modules": [
            {"name": "app", "source_roots": ["app/src"], "output": "app/out"},
            {"name": "util", "source_roots": ["util/src"], "output": "util/out"}
        ]
    }"#;
    let fixture = Fixture::with_project(
        MockCompiler::default(),
        config,
        &[
            ("app/src/A.java", "class A {}"),
            ("util/src/B.java", "class B {}"),
        ],
    );

    fixture.build(BuildType::Make).await;
    fixture.compiler.take_compiled();

    let exit = fixture
        .build_scoped(BuildType::ForcedCompilation, &["util".to_string()])
        .await;
    assert_eq!(exit, ExitCode::Ok);
    let compiled = fixture.compiler.take_compiled();
    assert_eq!(compiled, vec![fixture.project.join("util/src/B.java")]);
}

#[tokio::test]
async fn failed_compilation_keeps_stamps_of_successful_files() {
    let fixture = Fixture::with_project(
        MockCompiler::failing("Bad"),
        r#"{
            "name": "demo",
            "modules": [
                {"name": "app", "source_roots": ["src"], "output": "out"}
            ]
        }"#,
        &[
            ("src/Good.java", "class Good {}"),
            ("src/Bad.java", "class Bad {}"),
        ],
    );

    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Errors);
    assert_eq!(fixture.compiler.take_compiled().len(), 1);

    // Partial progress: only the failed file is recompiled on the next run.
    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Errors);
    let descriptor = fixture.service.cached_descriptor(&fixture.project).unwrap();
    let good = fixture.project.join("src/Good.java");
    let bad = fixture.project.join("src/Bad.java");
    assert!(descriptor.data.timestamps.stamp("java", &good).is_some());
    assert!(descriptor.data.timestamps.stamp("java", &bad).is_none());
}

#[tokio::test]
async fn clean_deletes_recorded_outputs() {
    let fixture = Fixture::new(MockCompiler::default());
    fixture.build(BuildType::Make).await;
    fixture.compiler.take_compiled();

    let output = fixture.project.join("out/A.class");
    assert!(output.exists());

    assert_eq!(fixture.build(BuildType::Clean).await, ExitCode::Ok);
    assert!(!output.exists());

    // Bookkeeping is gone with the outputs, so MAKE starts over.
    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Ok);
    assert_eq!(fixture.compiler.take_compiled().len(), 1);
}

#[tokio::test]
async fn deleted_source_loses_its_outputs_on_the_next_make() {
    let fixture = Fixture::new(MockCompiler::default());
    fixture.build(BuildType::Make).await;
    fixture.compiler.take_compiled();

    let source = fixture.project.join("src/A.java");
    let output = fixture.project.join("out/A.class");
    assert!(output.exists());

    std::fs::remove_file(&source).unwrap();
    fixture.service.notify_file_deleted(&fixture.project, &source);

    assert_eq!(fixture.build(BuildType::Make).await, ExitCode::Ok);
    assert!(!output.exists());
    assert!(fixture.compiler.take_compiled().is_empty());

    let descriptor = fixture.service.cached_descriptor(&fixture.project).unwrap();
    assert_eq!(descriptor.data.timestamps.stamp("java", &source), None);
}

#[tokio::test]
async fn broken_project_configuration_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    // No project.json at all.

    let service = BuildService::new(
        dir.path().join("data"),
        Arc::new(MockCompiler::default()) as Arc<dyn BatchCompiler>,
    );
    let result = service
        .start_build(
            &project,
            &[],
            BuildType::Make,
            Arc::new(CollectingHandler::default()),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(service.cached_project_count(), 0);
}

#[tokio::test]
async fn canceled_build_reports_canceled() {
    let fixture = Fixture::new(MockCompiler::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let exit = fixture
        .service
        .start_build(
            &fixture.project,
            &[],
            BuildType::Make,
            Arc::new(CollectingHandler::default()),
            cancel,
        )
        .await
        .unwrap();
    assert_eq!(exit, ExitCode::Canceled);
    assert!(fixture.compiler.take_compiled().is_empty());
}

#[tokio::test]
async fn jar_artifacts_register_once_per_output_path() {
    let config = r#"{
        "name": "demo",
        "modules": [
            {"name": "app", "source_roots": ["app/src"], "output": "app/out",
             "jar": "dist/app.jar"},
            {"name": "shadow", "source_roots": ["shadow/src"], "output": "shadow/out",
             "jar": "dist/app.jar"}
        ]
    }"#;
    let fixture = Fixture::with_project(
        MockCompiler::default(),
        config,
        &[
            ("app/src/A.java", "class A {}"),
            ("shadow/src/B.java", "class B {}"),
        ],
    );

    fixture.build(BuildType::Make).await;
    let descriptor = fixture.service.cached_descriptor(&fixture.project).unwrap();
    let artifacts = descriptor.artifacts.lock().unwrap();

    // Both modules map their output root to the same archive path; the
    // first registration owns the jar, the copy instructions both stand.
    assert_eq!(artifacts.jar_count(), 1);
    let jar = artifacts.jar(&fixture.project.join("dist/app.jar")).unwrap();
    assert_eq!(jar.name, "app");
    assert_eq!(artifacts.instructions().len(), 2);
}

#[tokio::test]
async fn unknown_module_in_scope_fails_before_building() {
    let fixture = Fixture::new(MockCompiler::default());
    let result = fixture
        .service
        .start_build(
            &fixture.project,
            &["nonexistent".to_string()],
            BuildType::Make,
            Arc::new(CollectingHandler::default()),
            CancellationToken::new(),
        )
        .await;
    assert!(result.is_err());
    assert_eq!(fixture.compiler.invocations(), 0);
}
