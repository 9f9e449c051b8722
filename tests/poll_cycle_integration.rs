//! Poll cycles over a file-backed directory and a mocked GitHub API

use async_trait::async_trait;
use mockito::{Matcher, Server};
use snappoll::{
    BuildTrigger, FileDirectory, PollCycle, PollerConfig, ProjectOutcome, RepositoryDirectory,
    TriggerError, Watermark,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const DIRECTORY: &str = r#"
repositories:
  - owner: anowner
    name: aname
    last_polled_at: 1501762400000
    snapcraft_name: my-snap
    store_name: my-snap
  - owner: quiet
    name: repo
    last_polled_at: 1501762400000
    snapcraft_name: quiet-snap
  - owner: new
    name: project
  - owner: taken
    name: name
    last_polled_at: 1501762400000
    snapcraft_name: mine
    store_name: theirs
  - owner: broken
    name: watermark
    last_polled_at: ''
    snapcraft_name: broken
"#;

#[derive(Default)]
struct RecordingTrigger {
    requests: Mutex<Vec<String>>,
}

#[async_trait]
impl BuildTrigger for RecordingTrigger {
    async fn request_build(&self, owner: &str, name: &str) -> Result<(), TriggerError> {
        self.requests.lock().unwrap().push(format!("{}/{}", owner, name));
        Ok(())
    }
}

#[tokio::test]
async fn test_cycle_requests_builds_and_advances_watermarks() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/anowner/aname/commits")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"[{"sha": "abc"}]"#)
        .create_async()
        .await;
    server
        .mock("GET", "/repos/quiet/repo/commits")
        .match_query(Matcher::Any)
        .with_status(304)
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/repos/quiet/repo/contents/".into()))
        .with_status(404)
        .with_body(r#"{"message": "Not Found"}"#)
        .create_async()
        .await;
    let untouched = server
        .mock("GET", Matcher::Regex(r"^/repos/(new|taken|broken)/".into()))
        .expect(0)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repositories.yaml");
    std::fs::write(&path, DIRECTORY).unwrap();

    let config = PollerConfig {
        api_endpoint: server.url(),
        ..Default::default()
    };
    let trigger = Arc::new(RecordingTrigger::default());
    let cycle = PollCycle::new(
        Arc::new(FileDirectory::new(&path)),
        Arc::new(config.repository_checker().unwrap()),
        trigger.clone(),
    )
    .with_concurrency(config.concurrency);

    let report = cycle.run().await.unwrap();

    let outcomes: Vec<(String, &ProjectOutcome)> = report
        .projects
        .iter()
        .map(|p| (format!("{}/{}", p.owner, p.name), &p.outcome))
        .collect();
    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes[0], ("anowner/aname".to_string(), &ProjectOutcome::NeedsBuild));
    assert_eq!(outcomes[1], ("quiet/repo".to_string(), &ProjectOutcome::Unchanged));
    assert!(matches!(outcomes[2].1, ProjectOutcome::Skipped(_)));
    assert!(matches!(outcomes[3].1, ProjectOutcome::Skipped(_)));
    assert!(matches!(outcomes[4].1, ProjectOutcome::Failed(_)));

    assert_eq!(*trigger.requests.lock().unwrap(), vec!["anowner/aname".to_string()]);
    untouched.assert_async().await;

    let original = Watermark::from_millis(1501762400000).unwrap();
    let projects = FileDirectory::new(&path).fetch_all().await.unwrap();
    assert_eq!(projects[0].watermark(), Ok(Some(report.started_at)));
    assert_eq!(projects[1].watermark(), Ok(Some(original)));
    assert_eq!(projects[3].watermark(), Ok(Some(original)));
}

#[tokio::test]
async fn test_unreadable_watermark_does_not_stop_the_cycle() {
    let mut server = Server::new_async().await;
    let good = server
        .mock("GET", "/repos/good/one/commits")
        .match_query(Matcher::UrlEncoded("since".into(), "2017-08-03T12:13:20.000Z".into()))
        .with_status(200)
        .with_body(r#"[{"sha": "abc"}]"#)
        .create_async()
        .await;
    let bad = server
        .mock("GET", Matcher::Regex(r"^/repos/bad/two/".into()))
        .expect(0)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repositories.yaml");
    std::fs::write(
        &path,
        r#"
repositories:
  - owner: good
    name: one
    last_polled_at: 1501762400000
    snapcraft_name: one
  - owner: bad
    name: two
    last_polled_at: yesterday
    snapcraft_name: two
"#,
    )
    .unwrap();

    let config = PollerConfig {
        api_endpoint: server.url(),
        ..Default::default()
    };
    let trigger = Arc::new(RecordingTrigger::default());
    let cycle = PollCycle::new(
        Arc::new(FileDirectory::new(&path)),
        Arc::new(config.repository_checker().unwrap()),
        trigger.clone(),
    );

    let report = cycle.run().await.unwrap();

    assert_eq!(report.projects[0].outcome, ProjectOutcome::NeedsBuild);
    assert!(matches!(
        &report.projects[1].outcome,
        ProjectOutcome::Failed(message) if message.starts_with("invalid watermark")
    ));
    assert_eq!(*trigger.requests.lock().unwrap(), vec!["good/one".to_string()]);
    good.assert_async().await;
    bad.assert_async().await;

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("last_polled_at: yesterday"));
}
