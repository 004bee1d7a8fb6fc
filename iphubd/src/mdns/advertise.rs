use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{REGISTRY_SERVICE_TYPE, TXT_VERSION};
use crate::config::AdvertiseConfig;

/// Build the advertisement for this registry instance.
/// An empty configured address lets the daemon fill in interface addresses.
pub fn registry_service_info(
    config: &AdvertiseConfig,
    hostname: &str,
    api_port: u16,
) -> Result<ServiceInfo> {
    let instance_name = format!("{}-{}", config.instance, hostname);
    let host_name = format!("{}.local.", hostname);

    let txt_records = HashMap::from([(
        TXT_VERSION.to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    )]);

    let service_info = ServiceInfo::new(
        REGISTRY_SERVICE_TYPE,
        &instance_name,
        &host_name,
        config.address.trim(),
        api_port,
        txt_records,
    )
    .context("Failed to create ServiceInfo")?;

    if config.address.trim().is_empty() {
        Ok(service_info.enable_addr_auto())
    } else {
        Ok(service_info)
    }
}

pub fn register_registry(
    daemon: &ServiceDaemon,
    config: &AdvertiseConfig,
    api_port: u16,
) -> Result<ServiceInfo> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    let service_info = registry_service_info(config, &hostname, api_port)?;

    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Registered {} as {} on port {}",
        REGISTRY_SERVICE_TYPE,
        service_info.get_fullname(),
        api_port
    );

    Ok(service_info)
}

pub fn unregister_registry(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Unregistered {}", service_info.get_fullname());
    Ok(())
}
