//! Stamps build date, time and enabled features into the crate
//! (`RAYMODE_BUILD_*`), shown by `raymode::build_info()`.

fn main() {
    let now = time::OffsetDateTime::now_utc();
    let date_fmt = time::format_description::parse("[year]-[month]-[day]").expect("valid date format");
    let time_fmt = time::format_description::parse("[hour]:[minute]:[second]Z").expect("valid time format");

    // Reproducible builds pin these from the environment
    let stamp = |var: &str, fallback: String| {
        println!("cargo:rerun-if-env-changed={var}");
        std::env::var(var).unwrap_or(fallback)
    };
    let date = stamp("RAYMODE_BUILD_DATE", now.format(&date_fmt).unwrap_or_else(|_| "unknown".to_string()));
    let time = stamp("RAYMODE_BUILD_TIME", now.format(&time_fmt).unwrap_or_else(|_| "unknown".to_string()));

    let mut features: Vec<String> = std::env::vars()
        .filter_map(|(key, _)| key.strip_prefix("CARGO_FEATURE_").map(|f| f.to_lowercase().replace('_', "-")))
        .collect();
    features.sort();
    let features = if features.is_empty() { "none".to_string() } else { features.join(",") };

    println!("cargo:rerun-if-changed=src");
    println!("cargo:rustc-env=RAYMODE_BUILD_DATE={date}");
    println!("cargo:rustc-env=RAYMODE_BUILD_TIME={time}");
    println!("cargo:rustc-env=RAYMODE_BUILD_FEATURES={features}");
}
