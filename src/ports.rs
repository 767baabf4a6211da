//! Port spacing rules for the fleet.
//!
//! Each server uses its game port plus the neighbouring ports, so any two
//! servers must be at least [`PORT_SPACING`] apart.

pub const PORT_SPACING: u16 = 3;

/// Port searched from when the caller does not ask for one.
pub const DEFAULT_BASE_PORT: u16 = 27016;

/// `(server id, port)` pairs of the current roster.
pub type PortMap<'a> = &'a [(u32, u16)];

/// Whether `port` keeps its distance from every server other than `exclude`.
pub fn is_port_available(roster: PortMap<'_>, port: u16, exclude: Option<u32>) -> bool {
    if port == 0 {
        return false;
    }
    roster
        .iter()
        .filter(|(id, _)| Some(*id) != exclude)
        .all(|(_, existing)| port.abs_diff(*existing) >= PORT_SPACING)
}

/// First available port at or above `start`, stepping by [`PORT_SPACING`].
///
/// `start == 0` searches from `base`. Returns `None` when the range up to
/// 65535 is exhausted.
pub fn next_available_port(roster: PortMap<'_>, start: u16, base: u16) -> Option<u16> {
    let first = if start == 0 { base.max(1) } else { start };
    (first..=u16::MAX)
        .step_by(PORT_SPACING as usize)
        .find(|port| is_port_available(roster, *port, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_window_is_exclusive_below_three() {
        let roster = [(1, 27016)];
        assert!(!is_port_available(&roster, 27016, None));
        assert!(!is_port_available(&roster, 27018, None));
        assert!(!is_port_available(&roster, 27014, None));
        assert!(is_port_available(&roster, 27019, None));
        assert!(is_port_available(&roster, 27013, None));
    }

    #[test]
    fn excluded_server_does_not_block_itself() {
        let roster = [(1, 27016), (2, 27030)];
        assert!(is_port_available(&roster, 27017, Some(1)));
        assert!(!is_port_available(&roster, 27031, Some(1)));
    }

    #[test]
    fn neighbour_at_27015_pushes_27016_away() {
        let roster = [(1, 27015)];
        assert!(!is_port_available(&roster, 27016, None));

        let suggested = next_available_port(&roster, 27016, DEFAULT_BASE_PORT).unwrap();
        assert!(suggested >= 27018);
        assert!(is_port_available(&roster, suggested, None));
    }

    #[test]
    fn skips_past_occupied_grid() {
        let roster = [(1, 27016), (2, 27019)];
        assert_eq!(next_available_port(&roster, 27016, DEFAULT_BASE_PORT), Some(27022));
        assert_eq!(next_available_port(&[], 0, DEFAULT_BASE_PORT), Some(27016));
    }

    #[test]
    fn result_is_idempotent_and_at_or_above_start() {
        let roster = [(1, 27016), (2, 27020), (3, 30001), (4, 65534)];
        for start in [1u16, 1024, 27015, 27016, 27017, 29999, 30000, 40000, 65530] {
            if let Some(port) = next_available_port(&roster, start, DEFAULT_BASE_PORT) {
                assert!(port >= start);
                assert!(is_port_available(&roster, port, None));
                assert_eq!(next_available_port(&roster, port, DEFAULT_BASE_PORT), Some(port));
            }
        }
    }

    #[test]
    fn search_is_bounded() {
        let roster = [(1, 65534)];
        assert_eq!(next_available_port(&roster, 65533, DEFAULT_BASE_PORT), None);
    }
}
