//! Smoke job run on each pool slot.

use crate::report::{JobReport, JOB_FINISHED};
use testbox_core::{ProviderError, PublishOptions, Publisher, VmSlot};

/// Boot a sandbox on `slot`, open a shell into it, tear it down and report.
///
/// Proves the slot can serve jobs: the image resolves, the container boots,
/// the SSH port is published and the shell server answers.
pub async fn run_smoke_job(slot: VmSlot, language: Option<String>, publisher: Publisher) -> JobReport {
    let mut vm = slot.lock().await;
    let worker = vm.full_name();
    let hostname = vm.hostname().to_string();

    let result = vm
        .sandboxed(language.as_deref(), |session| async move {
            let endpoint = session.params().endpoint();
            let server_id = session.server_id().map(str::to_string);
            Ok::<_, ProviderError>((endpoint, server_id))
        })
        .await;
    drop(vm);

    let report = match result {
        Ok((endpoint, server_id)) => {
            tracing::info!(vm = %worker, endpoint = %endpoint, "Smoke job passed");
            JobReport::passed(worker, hostname, language, endpoint, server_id)
        }
        Err(e) => {
            tracing::error!(vm = %worker, error = %e, "Smoke job errored");
            JobReport::errored(worker, hostname, language, e)
        }
    };

    let options = PublishOptions::new().with_kind(JOB_FINISHED);
    if let Err(e) = publisher.publish(&report, options).await {
        tracing::warn!(error = %e, "Failed to publish job report");
    }

    report
}
