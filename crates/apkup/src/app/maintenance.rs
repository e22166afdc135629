use apkup_core::{CATALOG, PackageDescriptor, SourceSpec};
use log::info;

use super::{App, find_package};
use crate::error::AppError;

pub fn run_list() {
    for descriptor in &CATALOG {
        println!("{}", list_line(descriptor));
    }
}

fn list_line(descriptor: &PackageDescriptor) -> String {
    format!(
        "{:<14} {:<20} {:<36} {}",
        descriptor.name,
        descriptor.title,
        descriptor.package_id,
        source_label(&descriptor.source)
    )
}

fn source_label(source: &SourceSpec) -> String {
    match source {
        SourceSpec::TaggedRelease(spec) => format!("github.com/{}/{}", spec.owner, spec.repo),
        SourceSpec::CiArtifactIndex(_) => "Mozilla CI".to_string(),
        SourceSpec::HtmlScrape(spec) => spec.page_url.to_string(),
    }
}

/// Remove staged downloads and stored update checks, for one package or all.
pub fn run_clean(app: &App, package: Option<&str>) -> Result<(), AppError> {
    let removed = match package {
        Some(name) => {
            let descriptor = find_package(name)?;
            app.downloader.cancel(descriptor.package_id);
            app.update_store.remove(descriptor.package_id);
            app.artifacts.delete(descriptor.package_id)
        }
        None => {
            app.update_store.clear();
            app.artifacts.clean_all()
        }
    };
    info!("Removed {removed} staged file(s)");
    println!("Removed {removed} file(s) from {}", app.artifacts.dir().display());
    Ok(())
}
