/// User agent presented when rotation is disabled
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

const CHROMIUM_PLATFORMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
];

const GECKO_PLATFORMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10.15",
    "X11; Linux x86_64",
    "X11; Ubuntu; Linux x86_64",
];

const CHROME_MAJORS: std::ops::RangeInclusive<u32> = 116..=124;
const FIREFOX_MAJORS: std::ops::RangeInclusive<u32> = 115..=125;
const SAFARI_VERSIONS: &[&str] = &["16.6", "17.0", "17.2", "17.4"];

/// Generate a pool of realistic desktop user agents.
///
/// The pool covers Chrome, Edge, Firefox and Safari across the platforms
/// those browsers actually ship on, so a random pick never yields an
/// impossible combination such as Safari on Linux.
pub fn generate_pool() -> Vec<String> {
    let mut pool = Vec::new();

    for platform in CHROMIUM_PLATFORMS {
        for major in CHROME_MAJORS {
            let chrome = format!(
                "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
                platform, major
            );
            pool.push(format!("{} Edg/{}.0.0.0", chrome, major));
            pool.push(chrome);
        }
    }

    for platform in GECKO_PLATFORMS {
        for major in FIREFOX_MAJORS {
            pool.push(format!(
                "Mozilla/5.0 ({}; rv:{}.0) Gecko/20100101 Firefox/{}.0",
                platform, major, major
            ));
        }
    }

    for version in SAFARI_VERSIONS {
        pool.push(format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{} Safari/605.1.15",
            version
        ));
    }

    pool
}
