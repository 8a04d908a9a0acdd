//! Network reachability and data-usage permission policy.
//!
//! The embedding application reports reachability once per tick; the
//! manager combines it with group consent to decide whether a queued entry
//! may be handed to the downloader. Policy never aborts in-flight work:
//! it only gates queue admission.

use crate::error::Error;

/// Network state as reported by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkReachability {
    /// No usable network.
    #[default]
    NotReachable,
    /// Connected over Wi-Fi (or other unmetered network).
    ViaWifi,
    /// Connected over a metered mobile-data network.
    ViaMobileData,
}

impl NetworkReachability {
    /// Whether any network is available at all.
    pub fn is_reachable(&self) -> bool {
        *self != NetworkReachability::NotReachable
    }
}

/// Decide whether a download may start under the current policy.
///
/// `mobile_data_granted` is true when any permission group covering the
/// entry has user consent for metered downloads. Wi-Fi downloads need no
/// consent; mobile-data downloads do.
///
/// Returns the blocking error, or `None` when the download may proceed.
pub fn admission_error(
    reachability: NetworkReachability,
    mobile_data_granted: bool,
) -> Option<Error> {
    match reachability {
        NetworkReachability::NotReachable => Some(Error::NetworkUnreachable(
            "no network connection".to_string(),
        )),
        NetworkReachability::ViaWifi => None,
        NetworkReachability::ViaMobileData => {
            if mobile_data_granted {
                None
            } else {
                Some(Error::NetworkWifiRequired)
            }
        }
    }
}
