//! Rendezvous port allocation.

use std::collections::HashSet;

use super::types::WatchError;

/// Pick the first port in `base..base + span` not held by a registered
/// session.
///
/// The caller must hold the registry lock across allocation and insertion so
/// that two concurrent `watch` commands cannot receive the same port.
pub fn allocate_port(base: u16, span: u16, in_use: &HashSet<u16>) -> Result<u16, WatchError> {
    let end = u32::from(base) + u32::from(span);
    (u32::from(base)..end)
        .filter_map(|p| u16::try_from(p).ok())
        .find(|p| !in_use.contains(p))
        .ok_or(WatchError::PortsExhausted { base, end })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_gets_base() {
        assert_eq!(allocate_port(8444, 64, &HashSet::new()).unwrap(), 8444);
    }

    #[test]
    fn skips_ports_in_use_regardless_of_order() {
        let in_use: HashSet<u16> = [8446, 8444, 8445].into_iter().collect();
        assert_eq!(allocate_port(8444, 64, &in_use).unwrap(), 8447);
    }

    #[test]
    fn reuses_released_gap() {
        let in_use: HashSet<u16> = [8444, 8446].into_iter().collect();
        assert_eq!(allocate_port(8444, 64, &in_use).unwrap(), 8445);
    }

    #[test]
    fn exhausted_window_is_an_error() {
        let in_use: HashSet<u16> = (8444..8447).collect();
        let err = allocate_port(8444, 3, &in_use).unwrap_err();
        assert!(matches!(err, WatchError::PortsExhausted { base: 8444, end: 8447 }));
    }

    #[test]
    fn window_never_wraps_past_u16() {
        let in_use: HashSet<u16> = [u16::MAX].into_iter().collect();
        let err = allocate_port(u16::MAX, 10, &in_use).unwrap_err();
        assert!(matches!(err, WatchError::PortsExhausted { .. }));
    }
}
