//! Writes the photo API's OpenAPI document. YAML by default, JSON when the
//! output path ends in `.json`; stdout when no path is given.

use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use photo_daemon::server::docs::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let openapi = ApiDoc::openapi();

    let Some(output) = env::args().nth(1) else {
        println!("{}", openapi.to_yaml().context("failed to serialise OpenAPI")?);
        return Ok(());
    };

    let path = Path::new(&output);
    let document = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => openapi
            .to_pretty_json()
            .context("failed to serialise OpenAPI as JSON")?,
        _ => openapi.to_yaml().context("failed to serialise OpenAPI")?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory for {}", path.display()))?;
    }
    fs::write(path, document).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
