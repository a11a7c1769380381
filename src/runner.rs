use crate::config::PipelineTarget;
use crate::models::RunReport;
use crate::notify::Notifier;
use crate::pipeline::{Pipeline, PipelineError};
use tracing::{error, info};

/// A pipeline run plus its notification, as used by the CLI and the trigger service.
#[derive(Clone)]
pub struct Runner {
    pipeline: Pipeline,
    notifier: Notifier,
}

impl Runner {
    pub fn new(pipeline: Pipeline, notifier: Notifier) -> Self {
        Self { pipeline, notifier }
    }

    pub async fn run_target(
        &self,
        name: &str,
        target: &PipelineTarget,
    ) -> Result<RunReport, PipelineError> {
        match self.pipeline.run(name, target).await {
            Ok(report) => {
                let summary = report.summary();
                info!(target = "feeds.pipeline", target_name = name, "{summary}");
                self.notifier.notify(&summary).await;
                Ok(report)
            }
            Err(err) => {
                let title = target.title.clone().unwrap_or_else(|| name.to_uppercase());
                error!(
                    target = "feeds.pipeline",
                    target_name = name,
                    stage = err.stage(),
                    error = %err,
                    "run failed"
                );
                self.notifier
                    .notify(&format!("{title} feed failed: {err}"))
                    .await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedSource, HttpSettings, TelegramSettings};
    use crate::http::build_client;
    use crate::pipeline::tests::{local_reference, pipeline, silent_server, target_in};
    use crate::telegram::TelegramClient;
    use crate::telegram::fake::FakeTelegram;

    fn runner(base: &str, timeout_secs: u64) -> Runner {
        let settings = TelegramSettings {
            api_base: base.to_string(),
            bot_token: Some("t0k".into()),
            ..TelegramSettings::default()
        };
        let http = build_client(&HttpSettings::default()).expect("client");
        let notifier = Notifier::new(TelegramClient::new(http, &settings), Some("42"));
        Runner::new(pipeline(timeout_secs), notifier)
    }

    #[tokio::test]
    async fn success_sends_summary() {
        let (fake, base) = FakeTelegram::start().await;
        let dir = tempfile::tempdir().expect("tmp");
        let target = target_in(dir.path(), local_reference(dir.path()));

        let report = runner(&base, 5)
            .run_target("maudau", &target)
            .await
            .expect("run");

        let sent = fake.calls_to("sendMessage");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["text"], report.summary());
        let text = sent[0]["text"].as_str().unwrap_or_default();
        assert!(text.starts_with("MAUDAU feed updated\nTotal offers: 4\nKept offers: 2"));
    }

    #[tokio::test]
    async fn timeout_notifies_failure_and_keeps_previous_feed() {
        let (fake, base) = FakeTelegram::start().await;
        let dir = tempfile::tempdir().expect("tmp");
        let target = target_in(dir.path(), FeedSource::url(silent_server().await));
        std::fs::create_dir_all(target.output.parent().expect("parent")).expect("mkdir");
        std::fs::write(&target.output, "<previous/>").expect("seed");

        runner(&base, 1)
            .run_target("maudau", &target)
            .await
            .expect_err("timeout");

        let sent = fake.calls_to("sendMessage");
        assert_eq!(sent.len(), 1);
        let text = sent[0]["text"].as_str().unwrap_or_default();
        assert!(text.starts_with("MAUDAU feed failed:"));
        assert!(text.contains("fetch_reference"));
        assert_eq!(
            std::fs::read_to_string(&target.output).expect("output"),
            "<previous/>"
        );
    }
}
