use std::collections::HashMap;
use std::sync::Arc;

use crem::concurrency::ConcurrencyGate;
use crem::config::{FileExtension, Language, RunConfig};
use crem::runtime::{PackageInfo, RuntimeRegistry};
use crem::{Job, RunRequest, SourceFile};

use super::test_config;

/// Builds a fake installed package directory under a throwaway data
/// directory: a `run` (and optional `compile`) bash script plus the
/// `pkg-info.json`/`.installed` pair the registry expects.
async fn install_fake_package(language: &str, compiled: bool) -> (tempfile::TempDir, Arc<crem::Runtime>) {
    let data_dir = tempfile::tempdir().expect("failed to create temp data dir");
    let install_dir = data_dir.path().join("packages").join(language).join("1.0.0");
    tokio::fs::create_dir_all(&install_dir).await.unwrap();

    let language_config = Language {
        name: language.to_owned(),
        extension: FileExtension::new("src").unwrap(),
        compile: None,
        run: RunConfig {
            command: vec![],
            env: HashMap::new(),
            mounts: vec![],
            path: "/usr/bin:/bin".to_owned(),
            limits: None,
        },
    };

    if compiled {
        tokio::fs::write(
            install_dir.join("compile"),
            "#!/bin/bash\ncp \"$1\" ./program\nchmod +x ./program\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            install_dir.join("run"),
            "#!/bin/bash\nexec ./program\n",
        )
        .await
        .unwrap();
    } else {
        tokio::fs::write(install_dir.join("run"), "#!/bin/bash\nexec cat \"$1\"\n")
            .await
            .unwrap();
    }
    for script in ["compile", "run"] {
        let path = install_dir.join(script);
        if tokio::fs::metadata(&path).await.is_ok() {
            let mut perms = tokio::fs::metadata(&path).await.unwrap().permissions();
            std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
            tokio::fs::set_permissions(&path, perms).await.unwrap();
        }
    }

    let info = PackageInfo {
        language: language.to_owned(),
        version: semver::Version::parse("1.0.0").unwrap(),
        aliases: vec![],
        provides: vec![],
        limit_overrides: HashMap::new(),
        language_config,
        build_platform: None,
        output_max_bytes: None,
    };
    // `compile` being present is what `Runtime::has_compile_stage` actually
    // keys off of via the language config's `compile.is_some()`, so mirror
    // `compiled` there too.
    let mut info = info;
    if compiled {
        info.language_config.compile = Some(crem::config::CompileConfig {
            command: vec![],
            source_name: "main.src".to_owned(),
            output_name: "program".to_owned(),
            env: HashMap::new(),
            limits: None,
        });
    }
    tokio::fs::write(
        install_dir.join("pkg-info.json"),
        serde_json::to_string(&info).unwrap(),
    )
    .await
    .unwrap();
    tokio::fs::write(install_dir.join(".installed"), "0").await.unwrap();

    let registry = RuntimeRegistry::new(data_dir.path());
    let runtime = registry.upsert(&install_dir).await.unwrap();
    (data_dir, runtime)
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_run_batch_interpreted_echoes_stdin() {
    let config = test_config();
    let (_data_dir, runtime) = install_fake_package("echo-lang", false).await;

    let request = RunRequest {
        files: vec![SourceFile {
            name: Some("main.src".to_owned()),
            content: "ignored".to_owned(),
            encoding: Default::default(),
        }],
        args: vec![],
        stdin: b"hello from stdin".to_vec(),
        ..Default::default()
    };

    let job = Job::new(runtime, request, &config).expect("job should validate");
    let gate = ConcurrencyGate::new(config.max_concurrent_jobs);
    let outcome = job.run_batch(&gate).await.expect("run_batch failed");

    assert!(outcome.compile.is_none());
    let run = outcome.run.expect("run stage should have executed");
    assert!(run.succeeded());
    assert_eq!(run.stdout, b"hello from stdin");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_run_batch_compiled_runs_after_compile() {
    let config = test_config();
    let (_data_dir, runtime) = install_fake_package("copy-lang", true).await;

    let request = RunRequest {
        files: vec![SourceFile {
            name: Some("main.src".to_owned()),
            content: "#!/bin/bash\necho compiled-output\n".to_owned(),
            encoding: Default::default(),
        }],
        ..Default::default()
    };

    let job = Job::new(runtime, request, &config).expect("job should validate");
    let gate = ConcurrencyGate::new(config.max_concurrent_jobs);
    let outcome = job.run_batch(&gate).await.expect("run_batch failed");

    let compile = outcome.compile.expect("compile stage should have run");
    assert!(compile.succeeded());
    let run = outcome.run.expect("run stage should have executed");
    assert!(run.succeeded());
    assert_eq!(run.stdout, b"compiled-output\n");
}
