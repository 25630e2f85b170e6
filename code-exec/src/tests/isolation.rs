use super::{
    fixtures::test_scenarios::*,
    utils::{
        assertions::assert_no_workspaces,
        defaults::{test_config, test_service},
        skip_if_not_available,
    },
};
use crate::{
    report, CodeExecutionService, ExecuteResponse, ExecutionRequest, ExecutionStatus, Phase,
    Result,
};
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[tokio::test]
async fn test_unsupported_language_has_no_side_effects() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("workspaces");
    let service = test_service(&root)?;

    let result = service
        .execute(ExecutionRequest::new("brainfuck", "+[-]"))
        .await?;

    assert_eq!(result.status(), ExecutionStatus::UnsupportedLanguage);
    assert!(result.failed());
    assert!(!root.exists());
    assert!(matches!(report(&result), ExecuteResponse::Error { .. }));
    Ok(())
}

#[tokio::test]
async fn test_infinite_loop_times_out() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let root = tempdir()?;
    let service = test_service(root.path())?;
    let budget = Duration::from_secs(1);

    let started = Instant::now();
    let result = service
        .execute(ExecutionRequest::new("python", PYTHON_INFINITE_LOOP).with_timeout(budget))
        .await?;
    let elapsed = started.elapsed();

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert_eq!(result.phase(), Some(Phase::Run));
    assert!(result.timed_out());
    assert!(result.failed());
    assert!(elapsed >= budget);
    assert!(elapsed < budget + Duration::from_secs(3), "took {:?}", elapsed);
    assert_no_workspaces(root.path());
    Ok(())
}

#[tokio::test]
async fn test_timeout_kills_descendants() -> Result<()> {
    if skip_if_not_available(&["bash"]) {
        return Ok(());
    }
    let root = tempdir()?;
    let outside = tempdir()?;
    let sentinel = outside.path().join("leaked");
    let service = test_service(root.path())?;

    let code = bash_forking_loop(&sentinel.to_string_lossy());
    let result = service
        .execute(ExecutionRequest::new("bash", code).with_timeout(Duration::from_millis(500)))
        .await?;
    assert!(result.timed_out());

    // the background worker sleeps 1s before writing
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert!(!sentinel.exists(), "a descendant survived the deadline");
    assert_no_workspaces(root.path());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_same_language_no_cross_talk() -> Result<()> {
    if skip_if_not_available(&["bash"]) {
        return Ok(());
    }
    let root = tempdir()?;
    let service = test_service(root.path())?;

    let markers: Vec<String> = (0..8).map(|i| format!("marker-{:02}-x", i)).collect();
    let mut handles = vec![];
    for marker in &markers {
        let service = service.clone();
        let request = ExecutionRequest::new("bash", bash_marker(marker));
        let marker = marker.clone();
        handles.push(tokio::spawn(async move {
            (marker, service.execute(request).await)
        }));
    }

    for handle in handles {
        let (marker, result) = handle.await.unwrap();
        let result = result?;
        assert_eq!(result.status(), ExecutionStatus::Success);
        for other in markers.iter().filter(|m| **m != marker) {
            assert!(
                !result.output().contains(other.as_str()),
                "{} saw {}",
                marker,
                other
            );
        }
        assert!(result.output().matches(marker.as_str()).count() >= 2);
    }

    assert_no_workspaces(root.path());
    Ok(())
}

#[tokio::test]
async fn test_workspace_removed_on_every_outcome() -> Result<()> {
    if skip_if_not_available(&["bash"]) {
        return Ok(());
    }
    let root = tempdir()?;
    let service = test_service(root.path())?;

    let ok = service
        .execute(ExecutionRequest::new("bash", "echo fine"))
        .await?;
    assert_eq!(ok.status(), ExecutionStatus::Success);
    assert_no_workspaces(root.path());

    let failed = service
        .execute(ExecutionRequest::new("bash", BASH_EXIT_CODE))
        .await?;
    assert_eq!(failed.status(), ExecutionStatus::RuntimeError);
    assert_eq!(failed.exit_code(), Some(42));
    assert!(failed.output().contains("before failure"));
    assert_no_workspaces(root.path());

    let slow = service
        .execute(
            ExecutionRequest::new("bash", "sleep 30").with_timeout(Duration::from_millis(200)),
        )
        .await?;
    assert!(slow.timed_out());
    assert_no_workspaces(root.path());
    Ok(())
}

#[tokio::test]
async fn test_cancelled_request_cleans_up() -> Result<()> {
    if skip_if_not_available(&["bash"]) {
        return Ok(());
    }
    let root = tempdir()?;
    let service = test_service(root.path())?;

    let request = ExecutionRequest::new("bash", "sleep 30");
    let cancelled =
        tokio::time::timeout(Duration::from_millis(300), service.execute(request)).await;
    assert!(cancelled.is_err());

    assert_no_workspaces(root.path());
    Ok(())
}

#[tokio::test]
async fn test_workspace_fault_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "")?;
    let service = CodeExecutionService::with_builtin_recipes(test_config(&blocker))?;

    let result = service
        .execute(ExecutionRequest::new("bash", "echo hi"))
        .await;
    match result {
        Err(e) => assert!(e.is_infrastructure()),
        // bash missing: the toolchain check runs before the workspace
        Ok(r) => assert_eq!(r.status(), ExecutionStatus::ToolchainUnavailable),
    }
    Ok(())
}
