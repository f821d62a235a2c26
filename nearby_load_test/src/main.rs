use nearby_load_test::config::Config;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub fn main() {
    nearby_cli_helpers::run_app_with_cli_and_config::<Config>(
        "nearby_load_test: social graph virtual user load tester",
        env!("CARGO_PKG_VERSION"),
        nearby_load_test::run,
        None,
    )
}
