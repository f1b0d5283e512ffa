//! Package inspection: the main app's Info.plist inside an .ipa
//!
//! An .ipa is a zip archive with the app bundle under
//! `Payload/<Name>.app/`. Only that bundle's own `Info.plist` is read;
//! embedded frameworks, extensions and watch apps carry their own and are
//! ignored.

use plist::Value;
use std::io::{Cursor, Read};
use thiserror::Error;

/// Info.plist files are small; anything larger is not one
const MAX_INFO_PLIST_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Not a readable archive: {0}")]
    Archive(String),

    #[error("No Payload/*.app/Info.plist in archive")]
    MissingInfoPlist,

    #[error("Malformed Info.plist: {0}")]
    Plist(String),
}

/// Fields read from the main bundle's Info.plist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    /// `CFBundleIdentifier`
    pub bundle_id: Option<String>,
    /// `CFBundleDisplayName`, else `CFBundleName`
    pub display_name: Option<String>,
    /// `CFBundleShortVersionString`
    pub version: Option<String>,
    /// `CFBundleVersion`
    pub build: Option<String>,
    /// `MinimumOSVersion`
    pub min_os_version: Option<String>,
}

/// `Payload/<Name>.app/Info.plist`, exactly one level below `Payload`
fn is_main_info_plist(name: &str) -> bool {
    let mut parts = name.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("Payload"), Some(bundle), Some("Info.plist"), None) if bundle.ends_with(".app")
    )
}

/// Read the main bundle's Info.plist out of package bytes
///
/// Binary and XML plists are both accepted.
pub fn inspect_package(bytes: &[u8]) -> Result<PackageInfo, InspectError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| InspectError::Archive(e.to_string()))?;

    let name = archive
        .file_names()
        .filter(|name| is_main_info_plist(name))
        .min()
        .map(str::to_string)
        .ok_or(InspectError::MissingInfoPlist)?;

    let mut raw = Vec::new();
    archive
        .by_name(&name)
        .map_err(|e| InspectError::Archive(e.to_string()))?
        .take(MAX_INFO_PLIST_BYTES)
        .read_to_end(&mut raw)
        .map_err(|e| InspectError::Archive(e.to_string()))?;

    let plist = Value::from_reader(Cursor::new(raw)).map_err(|e| InspectError::Plist(e.to_string()))?;
    let dict = plist
        .as_dictionary()
        .ok_or_else(|| InspectError::Plist("top level is not a dictionary".to_string()))?;

    let text = |key: &str| {
        dict.get(key)
            .and_then(Value::as_string)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(PackageInfo {
        bundle_id: text("CFBundleIdentifier"),
        display_name: text("CFBundleDisplayName").or_else(|| text("CFBundleName")),
        version: text("CFBundleShortVersionString"),
        build: text("CFBundleVersion"),
        min_os_version: text("MinimumOSVersion"),
    })
}
