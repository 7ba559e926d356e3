//! mDNS/UPnP advertisement is out of scope for this build; this is the
//! seam a real implementation would hang off of. Startup only logs what
//! it would have done, so `--upnp` is accepted and has a visible effect
//! without pulling in a discovery-broadcast dependency nobody in the
//! corpus uses.

pub fn announce(port: u16, upnp_requested: bool) {
    tracing::info!(port, "discovery-service listening");
    if upnp_requested {
        tracing::info!("UPnP port mapping requested but not implemented; relying on manual port forwarding");
    } else {
        tracing::debug!("mDNS/UPnP announcement not implemented; sessions are reachable by address only");
    }
}
