use apkup_backend::{ApiConsumer, ResolveError};
use chrono::{DateTime, Utc};
use log::debug;
use regex::Regex;
use serde::Deserialize;

use super::{UpstreamRelease, unsupported_device};
use crate::abi::ArchitectureSelector;
use crate::catalog::CiArtifactSpec;
use crate::fetch::fetch_json;

const ABI_PLACEHOLDER: &str = "{abi}";
const CHAIN_OF_TRUST_LOG: &str = "public/logs/chain_of_trust.log";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedTask {
    task_id: String,
    expires: DateTime<Utc>,
}

/// Value of `key` in the chain of trust log, which embeds the task
/// definition as loosely quoted `'key': 'value'` pairs.
fn log_value(log: &str, key: &str) -> Option<String> {
    let pattern = format!(r#"['"]{}['"]: ['"](.+?)['"]"#, regex::escape(key));
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(log)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
}

/// Resolve the newest build indexed under a CI task name.
///
/// The index entry must point at a live task. Artifacts are addressed
/// through the index route, so the chain of trust log and the download come
/// from whichever task the index names.
pub(crate) async fn find_release(
    consumer: &dyn ApiConsumer,
    spec: &CiArtifactSpec,
    selector: &ArchitectureSelector,
    package_id: &str,
    now: DateTime<Utc>,
) -> Result<UpstreamRelease, ResolveError> {
    let needs_abi = spec.task.contains(ABI_PLACEHOLDER) || spec.artifact.contains(ABI_PLACEHOLDER);
    let abi_name = if needs_abi {
        selector
            .select(spec.abi_names)
            .map(|(_, name)| name)
            .ok_or_else(|| unsupported_device(package_id, selector))?
    } else {
        ""
    };
    let task = spec.task.replace(ABI_PLACEHOLDER, abi_name);
    let artifact = spec.artifact.replace(ABI_PLACEHOLDER, abi_name);

    let task_url = format!("{}task/{task}", spec.index_url);
    let indexed: IndexedTask = fetch_json(consumer, &task_url).await?;
    if indexed.expires <= now {
        return Err(ResolveError::no_matching_release(
            package_id,
            format!("indexed task {} expired at {}", indexed.task_id, indexed.expires),
        ));
    }
    debug!("{package_id}: {task} points at task {}", indexed.task_id);

    let log_url = format!("{task_url}/artifacts/{CHAIN_OF_TRUST_LOG}");
    let log = consumer.fetch_text(&log_url).await?;

    let version = log_value(&log, spec.version_key).ok_or_else(|| {
        ResolveError::invalid_response(&log_url, format!("missing '{}'", spec.version_key))
    })?;
    let raw_date = log_value(&log, spec.date_key).ok_or_else(|| {
        ResolveError::invalid_response(&log_url, format!("missing '{}'", spec.date_key))
    })?;
    let published_at = DateTime::parse_from_rfc3339(&raw_date)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|error| {
            ResolveError::invalid_response(&log_url, format!("bad timestamp '{raw_date}': {error}"))
        })?;

    Ok(UpstreamRelease {
        raw_version: version,
        download_url: format!("{task_url}/artifacts/{artifact}"),
        published_at: Some(published_at),
        size_bytes: None,
    })
}

#[cfg(test)]
mod tests {
    use apkup_backend::Abi;
    use chrono::TimeZone;

    use super::*;
    use crate::test_support::FakeApiConsumer;

    const INDEX: &str = "https://ci.example/api/index/v1/";
    const TASK_URL: &str = "https://ci.example/api/index/v1/task/mobile.v2.fenix.release.latest.arm64-v8a";

    const LOG: &str = r#"2021-07-19 15:08:01,183 - scriptworker.cot.verify - INFO - {'payload': {'env': {'MOZ_BUILD_DATE': '20210719150750'},
 'version': '90.1.2', 'now': '2021-07-19T15:07:50.886Z', 'tag_name': 'v90.1.2',
 "published_at": "2021-07-19T15:07:50.886Z"}}"#;

    static FENIX: CiArtifactSpec = CiArtifactSpec {
        index_url: INDEX,
        task: "mobile.v2.fenix.release.latest.{abi}",
        artifact: "public/build/{abi}/target.apk",
        abi_names: &[(Abi::ArmeabiV7a, "armeabi-v7a"), (Abi::Arm64V8a, "arm64-v8a")],
        version_key: "version",
        date_key: "now",
    };

    fn indexed_task(expires: &str) -> String {
        format!(
            r#"{{"namespace":"mobile.v2.fenix.release.latest.arm64-v8a","taskId":"LQLNZtO6RxCqgtVzcnPy2Q","rank":0,"data":{{}},"expires":"{expires}"}}"#
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 7, 20, 0, 0, 0)
            .single()
            .expect("fixed timestamp should be valid")
    }

    #[test]
    fn log_values_accept_either_quote_style() {
        assert_eq!(log_value(LOG, "version").as_deref(), Some("90.1.2"));
        assert_eq!(
            log_value(LOG, "published_at").as_deref(),
            Some("2021-07-19T15:07:50.886Z")
        );
        assert_eq!(log_value(LOG, "missing"), None);
    }

    #[tokio::test]
    async fn resolves_version_date_and_artifact_for_the_device_abi() {
        let consumer = FakeApiConsumer::new()
            .with_response(TASK_URL, &indexed_task("2022-07-19T15:07:50.886Z"))
            .with_response(
                &format!("{TASK_URL}/artifacts/public/logs/chain_of_trust.log"),
                LOG,
            );
        let selector = ArchitectureSelector::new(vec![Abi::Arm64V8a, Abi::ArmeabiV7a]);

        let release = find_release(&consumer, &FENIX, &selector, "org.mozilla.firefox", now())
            .await
            .expect("indexed task should resolve");

        assert_eq!(release.raw_version, "90.1.2");
        assert_eq!(
            release.download_url,
            format!("{TASK_URL}/artifacts/public/build/arm64-v8a/target.apk")
        );
        assert_eq!(
            release.published_at,
            DateTime::parse_from_rfc3339("2021-07-19T15:07:50.886Z")
                .ok()
                .map(|date| date.with_timezone(&Utc))
        );
        assert_eq!(release.size_bytes, None);
    }

    #[tokio::test]
    async fn expired_index_entries_are_rejected() {
        let consumer = FakeApiConsumer::new().with_response(
            &format!("{INDEX}task/mobile.v2.fenix.release.latest.armeabi-v7a"),
            &indexed_task("2021-07-01T00:00:00Z"),
        );
        let selector = ArchitectureSelector::new(vec![Abi::ArmeabiV7a]);

        let result = find_release(&consumer, &FENIX, &selector, "org.mozilla.firefox", now()).await;

        assert!(matches!(
            result,
            Err(ResolveError::NoMatchingRelease { ref reason, .. }) if reason.contains("expired")
        ));
        assert_eq!(consumer.requests().len(), 1);
    }

    #[tokio::test]
    async fn log_without_the_version_key_is_an_invalid_response() {
        let consumer = FakeApiConsumer::new()
            .with_response(TASK_URL, &indexed_task("2022-07-19T15:07:50.886Z"))
            .with_response(
                &format!("{TASK_URL}/artifacts/public/logs/chain_of_trust.log"),
                "scriptworker started\nnothing useful here",
            );
        let selector = ArchitectureSelector::new(vec![Abi::Arm64V8a]);

        let result = find_release(&consumer, &FENIX, &selector, "org.mozilla.firefox", now()).await;

        assert!(matches!(
            result,
            Err(ResolveError::InvalidResponse { ref details, .. }) if details.contains("version")
        ));
    }

    #[tokio::test]
    async fn unsupported_device_fails_without_requests() {
        let consumer = FakeApiConsumer::new();
        let selector = ArchitectureSelector::new(vec![Abi::X86]);

        let result = find_release(&consumer, &FENIX, &selector, "org.mozilla.firefox", now()).await;

        assert!(matches!(
            result,
            Err(ResolveError::NoMatchingRelease { .. })
        ));
        assert!(consumer.requests().is_empty());
    }
}
