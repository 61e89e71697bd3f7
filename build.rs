fn main() {
    // Load .env file for WiFi configuration
    load_env_config();

    // Host builds (library + unit tests) link as ordinary executables.
    if !is_firmware_build() {
        return;
    }

    linker_be_nice();
    // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
    println!("cargo:rustc-link-arg=-Tlinkall.x");
}

/// The esp32c3 feature on a riscv32 target means we are linking the firmware image
fn is_firmware_build() -> bool {
    let feature = std::env::var_os("CARGO_FEATURE_ESP32C3").is_some();
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    feature && arch == "riscv32"
}

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    // Tell cargo to rerun if environment variables change
    println!("cargo:rerun-if-env-changed=WIFI_SSID");
    println!("cargo:rerun-if-env-changed=WIFI_PASSWORD");

    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    // Empty strings are baked in when unset so host builds never fail on env!()
    let wifi_ssid = env::var("WIFI_SSID").unwrap_or_default().trim().to_string();
    let wifi_password = env::var("WIFI_PASSWORD")
        .unwrap_or_default()
        .trim()
        .to_string();

    println!("cargo:rustc-env=WIFI_SSID={}", wifi_ssid);
    println!("cargo:rustc-env=WIFI_PASSWORD={}", wifi_password);

    if is_firmware_build() {
        if wifi_ssid.is_empty() {
            println!("cargo:warning=WIFI_SSID is empty - the status page will be unreachable");
        } else {
            println!("cargo:warning=WIFI_SSID configured: {}", wifi_ssid);
        }
        if wifi_password.is_empty() {
            println!("cargo:warning=WIFI_PASSWORD is empty - joining an open network");
        }
    }
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!(
                        "💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler."
                    );
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
