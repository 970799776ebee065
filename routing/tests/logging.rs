// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Installing the global subscriber, in a process of its own

use tracing_subscriber::filter::LevelFilter;
use zebra_routing::RouterError;
use zebra_routing::logging::init_tracing;

#[test]
fn test_init_tracing_once() {
    let control = init_tracing(LevelFilter::INFO).expect("First initialization should succeed");
    assert_eq!(control.get_default_level(), Some(LevelFilter::INFO));

    control.set_default_level(LevelFilter::DEBUG);
    control.set_target_level("zebra_routing::mlag", LevelFilter::TRACE);
    let config = control.config().expect("Config should be readable");
    assert_eq!(control.get_default_level(), Some(LevelFilter::DEBUG));
    assert!(
        config
            .as_config_string()
            .starts_with("debug,zebra_routing::mlag=trace")
    );

    let second = init_tracing(LevelFilter::DEBUG);
    assert!(matches!(second, Err(RouterError::InvalidConfig(_))));
}
