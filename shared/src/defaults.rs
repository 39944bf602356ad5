//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the configuration
//! structures. These functions are used by serde when deserializing configuration
//! files that don't specify certain optional fields.

// Database defaults

/// Default database user
pub fn default_db_user() -> String {
    "yascheduler".to_string()
}

/// Default database password
pub fn default_db_password() -> String {
    "password".to_string()
}

/// Default database name
pub fn default_db_database() -> String {
    "database".to_string()
}

/// Default database host
pub fn default_db_host() -> String {
    "localhost".to_string()
}

/// Default PostgreSQL port
pub fn default_db_port() -> u16 {
    5432
}

// Local daemon defaults

/// Default local data directory
pub fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./data")
}

/// Maximum concurrent webhook requests (default: 5)
pub fn default_webhook_reqs_limit() -> usize {
    5
}

/// Concurrent node connection workers (default: 10)
pub fn default_conn_machine_limit() -> usize {
    10
}

/// Maximum pending node connection messages (default: 10)
pub fn default_conn_machine_pending() -> usize {
    10
}

/// Concurrent task allocation workers (default: 20)
pub fn default_allocate_limit() -> usize {
    20
}

/// Maximum pending allocation messages (default: 1)
pub fn default_allocate_pending() -> usize {
    1
}

/// Concurrent task consumption workers (default: 20)
pub fn default_consume_limit() -> usize {
    20
}

/// Maximum pending consumption messages (default: 1)
pub fn default_consume_pending() -> usize {
    1
}

/// Concurrent node deallocation workers (default: 5)
pub fn default_deallocate_limit() -> usize {
    5
}

/// Maximum pending deallocation messages (default: 1)
pub fn default_deallocate_pending() -> usize {
    1
}

// Remote host defaults

/// Default SSH login for statically configured nodes
pub fn default_remote_user() -> String {
    "root".to_string()
}

// Engine defaults

/// Exit code of check_cmd that means "task still running" (default: 0)
pub fn default_check_cmd_code() -> i32 {
    0
}

/// Seconds between engine liveness checks (default: 10)
pub fn default_engine_sleep_interval() -> u64 {
    10
}

// Cloud provider defaults

/// Default maximum nodes per cloud provider
pub fn default_cloud_max_nodes() -> usize {
    10
}

/// Default cloud provider priority (higher wins)
pub fn default_cloud_priority() -> i32 {
    0
}

/// Seconds a node must stay idle before deallocation, Azure (default: 300)
pub fn default_az_idle_tolerance() -> u64 {
    300
}

/// Seconds a node must stay idle before deallocation (default: 120)
pub fn default_cloud_idle_tolerance() -> u64 {
    120
}

/// Default Azure resource group
pub fn default_az_resource_group() -> String {
    "yascheduler-rg".to_string()
}

/// Default Azure location
pub fn default_az_location() -> String {
    "westeurope".to_string()
}

/// Default Azure virtual network
pub fn default_az_vnet() -> String {
    "yascheduler-vnet".to_string()
}

/// Default Azure subnet
pub fn default_az_subnet() -> String {
    "yascheduler-subnet".to_string()
}

/// Default Azure network security group
pub fn default_az_nsg() -> String {
    "yascheduler-nsg".to_string()
}

/// Default Azure VM size
pub fn default_az_vm_size() -> String {
    "Standard_B1s".to_string()
}

/// Default Azure VM image URN (publisher:offer:sku:version)
pub fn default_az_image_urn() -> String {
    "Debian:debian-11-daily:11-backports-gen2:latest".to_string()
}

/// Default Azure admin user (root is forbidden on Azure)
pub fn default_az_user() -> String {
    "yascheduler".to_string()
}

/// Default Hetzner server type
pub fn default_hetzner_server_type() -> String {
    "cx51".to_string()
}

/// Default Hetzner image name
pub fn default_hetzner_image_name() -> String {
    "debian-10".to_string()
}

// Scheduler defaults

/// Seconds between pipeline producer ticks (default: 6)
pub fn default_sleep_interval() -> u64 {
    6
}

/// SSH connect timeout in seconds (default: 10)
pub fn default_connect_timeout() -> u64 {
    10
}
