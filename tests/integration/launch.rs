//! Pack a scripted program, then load and run it from the artifact.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use launchpack::artifact::{ArtifactReader, LoadError, Platform};
use launchpack::engine::testing::{ScriptedEngine, Step};
use launchpack::engine::{EngineProperty, EventId, ReturnValue, ScriptEngine};
use launchpack::util::config::PackConfig;
use launchpack::util::diagnostic::Diagnostics;
use launchpack::{launch, pack};
use tempfile::TempDir;

struct Project {
    dir: TempDir,
    config: PackConfig,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let stubs = dir.path().join("stub");
        fs::create_dir(&stubs).unwrap();
        fs::write(stubs.join("launchpack_linux.bin"), vec![0x7f; 2048]).unwrap();

        let mut config = PackConfig::default();
        config.build.platform = Some(Platform::Linux);
        config.build.stub_dir = Some(stubs);
        config.build.quiet = true;
        Self { dir, config }
    }

    fn script(&self) -> PathBuf {
        self.dir.path().join("game.nvgt")
    }

    fn pack(
        &self,
        program: &ScriptedEngine,
    ) -> PathBuf {
        let mut diagnostics = Diagnostics::new();
        pack(program, &self.script(), &self.config, &mut diagnostics)
            .unwrap()
            .output
    }

    fn launch(
        &self,
        artifact: PathBuf,
    ) -> (i32, ScriptedEngine) {
        let mut engine = ScriptedEngine::new();
        let reader = ArtifactReader::open(artifact, Platform::Linux);
        let code = launch(&reader, &mut engine, &mut Diagnostics::new());
        (code, engine)
    }
}

#[test]
fn test_packed_program_returns_exit_code() {
    let project = Project::new();
    let program = ScriptedEngine::new().function(
        "int main()",
        vec![
            Step::Log("start".into()),
            Step::Yield,
            Step::Return(ReturnValue::Int(7)),
        ],
    );
    let artifact = project.pack(&program);
    assert_eq!(artifact, project.dir.path().join("game"));

    let (code, engine) = project.launch(artifact);
    assert_eq!(code, 7);
    assert_eq!(engine.journal(), vec!["globals", "start"]);
}

#[test]
fn test_packed_properties_reach_engine() {
    let mut project = Project::new();
    project.config.scripting.max_nested_calls = 500;
    project.config.scripting.allow_multiline_strings = true;
    let program = ScriptedEngine::new().function("void main()", vec![]);

    let (code, engine) = project.launch(project.pack(&program));
    assert_eq!(code, 0);
    assert_eq!(engine.property(EngineProperty::MaxNestedCalls.index()), 500);
    assert_eq!(engine.property(EngineProperty::AllowMultilineStrings.index()), 1);
    assert_eq!(engine.property(EngineProperty::AllowUnsafeReferences.index()), 1);
    assert_eq!(engine.property(EngineProperty::InitGlobalVarsAfterBuild.index()), 0);
}

#[test]
fn test_release_build_strips_debug() {
    let mut project = Project::new();
    project.config.build.debug = false;
    let program = ScriptedEngine::new()
        .function("int main()", vec![Step::Line(3), Step::Return(ReturnValue::Int(1))]);

    let (code, engine) = project.launch(project.pack(&program));
    assert_eq!(code, 1);
    assert!(!engine.has_debug_info());
}

#[test]
fn test_coroutines_and_exit() {
    let project = Project::new();
    let program = ScriptedEngine::new()
        .function(
            "int main()",
            vec![
                Step::Spawn("void worker()".into()),
                Step::Wait(EventId(1)),
                Step::Log("main resumed".into()),
                Step::Exit(42),
            ],
        )
        .function(
            "void worker()",
            vec![
                Step::Sleep(Duration::from_millis(2)),
                Step::Signal(EventId(1)),
                Step::Yield,
                Step::Yield,
                Step::Log("worker done".into()),
            ],
        )
        .function("void on_exit()", vec![Step::Log("bye".into())]);

    let (code, engine) = project.launch(project.pack(&program));
    assert_eq!(code, 42);
    assert_eq!(engine.journal(), vec!["globals", "main resumed", "bye"]);
}

#[test]
fn test_unpacked_stub_fails_to_load() {
    let project = Project::new();
    let stub = project.dir.path().join("stub").join("launchpack_linux.bin");
    let reader = ArtifactReader::open(stub, Platform::Linux);
    let mut engine = ScriptedEngine::new();

    let err = reader.load(&mut engine).unwrap_err();
    assert!(matches!(err, LoadError::OffsetOutOfRange { .. }));
    assert_eq!(
        launch(&reader, &mut engine, &mut Diagnostics::new()),
        err.exit_code()
    );
    assert!(engine.journal().is_empty());
}
