//! Platform strings and compatibility between provided and required platforms.

use regex::Regex;
use std::sync::LazyLock;

static MACOSX_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^macosx-(\d+)\.(\d+)-(.*)$").expect("valid regex"));
static DARWIN_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^darwin-(\d+)\.(\d+)\.(\d+)-(.*)$").expect("valid regex"));

/// Platform string of the running system, `<os>-<arch>`.
pub fn supported_platform() -> String {
    format!("{}-{}", detect_os(), detect_arch())
}

fn detect_os() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        std::env::consts::OS
    }
}

fn detect_arch() -> &'static str {
    #[cfg(target_arch = "x86")]
    {
        "i686"
    }
    #[cfg(not(target_arch = "x86"))]
    {
        std::env::consts::ARCH
    }
}

/// Can code built for `provided` run on `required`?
///
/// A missing platform on either side is compatible with everything. Besides
/// exact matches, a `macosx-A.B-arch` build runs on any later minor release of
/// the same major version, and legacy `darwin-N.x.y` builds run on
/// `macosx-10.(N-4)` and later.
pub fn compatible_platforms(provided: Option<&str>, required: Option<&str>) -> bool {
    let (Some(provided), Some(required)) = (provided, required) else {
        return true;
    };
    if provided == required {
        return true;
    }

    let Some(req) = MACOSX_VERSION.captures(required) else {
        return false;
    };
    let req_major: u32 = req[1].parse().unwrap_or(0);
    let req_minor: u32 = req[2].parse().unwrap_or(0);

    if let Some(prov) = MACOSX_VERSION.captures(provided) {
        let prov_major: u32 = prov[1].parse().unwrap_or(u32::MAX);
        let prov_minor: u32 = prov[2].parse().unwrap_or(u32::MAX);
        let arch_matches = &prov[3] == "fat" || prov[3] == req[3];
        return prov_major == req_major && prov_minor <= req_minor && arch_matches;
    }

    if let Some(darwin) = DARWIN_VERSION.captures(provided) {
        let darwin_major: u32 = darwin[1].parse().unwrap_or(0);
        return darwin_major >= 4 && req_major == 10 && req_minor >= darwin_major - 4;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_platform() {
        let platform = supported_platform();
        let (os, arch) = platform.split_once('-').unwrap();
        assert!(!os.is_empty());
        assert!(!arch.is_empty());

        #[cfg(target_os = "linux")]
        assert_eq!(os, "linux");

        #[cfg(target_arch = "x86_64")]
        assert!(platform.ends_with("-x86_64"));
    }

    #[test]
    fn test_unset_platform_is_compatible() {
        assert!(compatible_platforms(None, Some("linux-x86_64")));
        assert!(compatible_platforms(Some("linux-x86_64"), None));
        assert!(compatible_platforms(None, None));
    }

    #[test]
    fn test_exact_match_only_for_other_platforms() {
        assert!(compatible_platforms(
            Some("linux-x86_64"),
            Some("linux-x86_64")
        ));
        assert!(!compatible_platforms(
            Some("linux-aarch64"),
            Some("linux-x86_64")
        ));
        assert!(!compatible_platforms(
            Some("macosx-10.9-x86_64"),
            Some("linux-x86_64")
        ));
    }

    #[test]
    fn test_macosx_minor_versions() {
        let req = Some("macosx-10.12-x86_64");
        assert!(compatible_platforms(Some("macosx-10.9-x86_64"), req));
        assert!(!compatible_platforms(Some("macosx-10.13-x86_64"), req));
        assert!(!compatible_platforms(Some("macosx-11.0-x86_64"), req));
        assert!(!compatible_platforms(Some("macosx-10.9-arm64"), req));
        assert!(compatible_platforms(Some("macosx-10.9-fat"), req));
    }

    #[test]
    fn test_darwin_builds() {
        assert!(compatible_platforms(
            Some("darwin-8.2.0-Power_Macintosh"),
            Some("macosx-10.4-ppc")
        ));
        assert!(compatible_platforms(
            Some("darwin-7.2.0-Power_Macintosh"),
            Some("macosx-10.5-ppc")
        ));
        assert!(!compatible_platforms(
            Some("darwin-8.2.0-Power_Macintosh"),
            Some("macosx-10.3-ppc")
        ));
    }
}
