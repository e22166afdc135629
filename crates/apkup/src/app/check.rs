use apkup_backend::UpdateCheckResult;
use apkup_core::{PackageDescriptor, PrefetchOutcome};
use futures_util::future::join_all;
use log::warn;

use super::install::compatibility_issue;
use super::{App, select_packages};
use crate::error::AppError;

pub async fn run_check(
    app: &App,
    names: &[String],
    use_cache: bool,
    prefetch: bool,
) -> Result<(), AppError> {
    let descriptors = select_packages(names)?;
    let device = app.connect().await?;
    let checker = app.update_checker(&device);
    let prefetcher = prefetch.then(|| app.prefetcher(&device));

    let (supported, unsupported): (Vec<_>, Vec<_>) = descriptors
        .into_iter()
        .partition(|descriptor| compatibility_issue(descriptor, &device.profile).is_none());
    for descriptor in unsupported {
        println!("{:<14} not supported on this device", descriptor.name);
    }

    let checks = supported.into_iter().map(|descriptor| {
        let resolver = app.resolver(descriptor, &device);
        let checker = &checker;
        async move { (descriptor, checker.check(&resolver, use_cache).await) }
    });

    let mut first_error = None;
    for (descriptor, outcome) in join_all(checks).await {
        match outcome {
            Ok(result) => {
                println!("{}", check_line(descriptor, &result));
                if result.is_update_available
                    && let Some(prefetcher) = &prefetcher
                {
                    let outcome = prefetcher.prefetch(descriptor, &result.release).await;
                    println!("{:<14} {}", "", describe_prefetch(&outcome));
                }
            }
            Err(error) => {
                let error = AppError::check_failed(descriptor.name, error);
                warn!("{error}");
                println!("{:<14} check failed: {error}", descriptor.name);
                first_error.get_or_insert(error);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

fn check_line(descriptor: &PackageDescriptor, result: &UpdateCheckResult) -> String {
    let status = if result.is_update_available {
        "update available"
    } else {
        "up to date"
    };
    format!(
        "{:<14} {:<28} {status}",
        descriptor.name, result.display_version
    )
}

fn describe_prefetch(outcome: &PrefetchOutcome) -> String {
    match outcome {
        PrefetchOutcome::SkippedMeteredNetwork => "not downloaded on a metered network".to_string(),
        PrefetchOutcome::AlreadyCached => "already downloaded".to_string(),
        PrefetchOutcome::Downloaded => "downloaded and verified".to_string(),
        PrefetchOutcome::Rejected { fingerprint } => {
            format!("download discarded, unexpected signature {fingerprint}")
        }
        PrefetchOutcome::Failed(message) => format!("download failed: {message}"),
    }
}
