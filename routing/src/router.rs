// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Module that implements a router instance

use derive_builder::Builder;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

use crate::ctl::RouterCtlSender;
use crate::errors::RouterError;
use crate::mcast::MulticastMode;
use crate::mlag::{DEFAULT_MLAG_SOCK_PATH, MlagSender};
use crate::rio::{RioHandle, start_rio};
use crate::seqnum::SeqCounter;

/// Struct to configure router object. N.B we derive a builder type `RouterParamsBuilder`
/// and provide defaults for each field.
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct RouterParams {
    #[builder(setter(into), default = "zebra".to_string())]
    pub name: String,

    #[builder(default = false)]
    pub asic_offloaded: bool,

    #[builder(default = true)]
    pub notify_on_ack: bool,

    #[builder(default = false)]
    pub supports_nhgs: bool,

    /// RIB events processed per work-queue cycle
    #[builder(default = 1000)]
    pub packets_to_process: usize,

    #[builder(default = Duration::from_millis(10))]
    pub rib_hold_time: Duration,

    #[builder(default = Duration::from_millis(1))]
    pub rib_retry_time: Duration,

    #[builder(default = 64)]
    pub rib_max_retries: u32,

    /// delay before stale routes and nexthop-groups get swept
    #[builder(default = Duration::from_secs(60))]
    pub graceful_restart_time: Duration,

    #[builder(default = 64)]
    pub multipath_num: usize,

    #[builder(default = MulticastMode::NoConfig)]
    pub multicast_mode: MulticastMode,

    #[builder(setter(into), default = DEFAULT_MLAG_SOCK_PATH.into())]
    pub mlag_sock_path: PathBuf,

    #[builder(default = Duration::from_secs(10))]
    pub mlag_retry_time: Duration,
}

impl RouterParamsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.packets_to_process == Some(0) {
            return Err("packets-to-process must be at least 1".to_string());
        }
        if self.multipath_num == Some(0) {
            return Err("multipath-num must be at least 1".to_string());
        }
        if let Some(path) = &self.mlag_sock_path {
            if path.as_os_str().is_empty() {
                return Err("MLAG socket path must not be empty".to_string());
            }
        }
        Ok(())
    }
}

impl Display for RouterParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        writeln!(f, "Router config")?;
        writeln!(f, "  name          : {}", self.name)?;
        writeln!(f, "  asic-offload  : {}", self.asic_offloaded)?;
        writeln!(f, "  notify-on-ack : {}", self.notify_on_ack)?;
        writeln!(f, "  nhg support   : {}", self.supports_nhgs)?;
        writeln!(f, "  zapi-packets  : {}", self.packets_to_process)?;
        writeln!(
            f,
            "  work-queue    : hold {:?} retry {:?} max-retries {}",
            self.rib_hold_time, self.rib_retry_time, self.rib_max_retries
        )?;
        writeln!(f, "  graceful-rst  : {:?}", self.graceful_restart_time)?;
        writeln!(f, "  multipath     : {}", self.multipath_num)?;
        writeln!(f, "  rpf-lookup    : {}", self.multicast_mode)?;
        writeln!(
            f,
            "  MLAG          : {} (retry {:?})",
            self.mlag_sock_path.display(),
            self.mlag_retry_time
        )
    }
}

/// Top-most object representing a router
pub struct Router {
    name: String,
    params: RouterParams,
    rio_handle: RioHandle,
    seq: Arc<SeqCounter>,
    shutdown: Arc<AtomicBool>,
    mlag_tx: MlagSender,
}

#[allow(clippy::new_without_default)]
impl Router {
    /// Start a router object
    ///
    /// # Errors
    /// Fails if the router IO cannot be started.
    pub fn new(params: RouterParams) -> Result<Router, RouterError> {
        let name = &params.name;

        debug!("{name}: Initializing...");
        debug!("{name}: Starting router IO...");
        let rio_handle = start_rio(&params)?;

        debug!("{name}: Successfully started with parameters:\n{params}");
        let router = Router {
            name: name.to_owned(),
            seq: rio_handle.seq.clone(),
            shutdown: rio_handle.shutdown.clone(),
            mlag_tx: rio_handle.mlag_tx.clone(),
            params,
            rio_handle,
        };
        Ok(router)
    }

    /// Stop this router instance
    pub fn stop(&mut self) {
        if let Err(e) = self.rio_handle.finish() {
            error!(
                "Failed to stop the router IO for router '{}': {e}",
                self.name
            );
        }
        debug!("Router instance '{}' is now stopped", self.name);
    }

    /// Next router-wide sequence number. Can be called from any thread.
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn get_next_sequence(&self) -> Result<u32, RouterError> {
        if self.is_shutting_down() {
            return Err(RouterError::ShuttingDown);
        }
        Ok(self.seq.next())
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_ctl_tx(&self) -> RouterCtlSender {
        self.rio_handle.get_ctl_tx()
    }
    /// A sender to queue messages towards the MLAG daemon from any thread
    #[must_use]
    pub fn get_mlag_tx(&self) -> MlagSender {
        self.mlag_tx.clone()
    }
    #[must_use]
    pub fn get_name(&self) -> &str {
        &self.name
    }
    #[must_use]
    pub fn get_params(&self) -> &RouterParams {
        &self.params
    }
}
