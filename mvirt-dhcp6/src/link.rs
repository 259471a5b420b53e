//! Link state snapshots and the readiness predicate.

use netlink_packet_route::link::{LinkAttribute, LinkFlag, LinkMessage, State};

/// Kernel operational state code for "up" (`IF_OPER_UP`).
pub const IF_OPER_UP: u8 = 6;

/// Snapshot of a kernel network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    pub index: u32,
    pub name: String,
    /// `IFF_UP` is set.
    pub admin_up: bool,
    /// RFC 2863 operational state code as reported by the kernel.
    pub oper_state: u8,
    /// Link-layer address, empty for links without one.
    pub mac: Vec<u8>,
    /// Cumulative transmitted packet counter.
    pub tx_packets: u64,
}

impl LinkState {
    /// Whether a listener may be started on this link.
    ///
    /// Some virtual backends report admin and oper up before the link moves
    /// traffic, so a non-zero transmit counter is required as well.
    pub fn is_ready(&self) -> bool {
        self.admin_up && self.oper_state == IF_OPER_UP && self.tx_packets > 0
    }

    /// Convert a raw rtnetlink link message.
    pub fn from_message(msg: &LinkMessage) -> Self {
        let mut state = LinkState {
            index: msg.header.index,
            admin_up: msg.header.flags.contains(&LinkFlag::Up),
            ..Default::default()
        };

        let mut tx32 = None;
        let mut tx64 = None;
        for attr in &msg.attributes {
            match attr {
                LinkAttribute::IfName(name) => state.name = name.clone(),
                LinkAttribute::OperState(oper) => state.oper_state = oper_code(oper),
                LinkAttribute::Address(addr) => state.mac = addr.clone(),
                LinkAttribute::Stats64(stats) => tx64 = Some(stats.tx_packets),
                LinkAttribute::Stats(stats) => tx32 = Some(u64::from(stats.tx_packets)),
                _ => {}
            }
        }
        state.tx_packets = tx64.or(tx32).unwrap_or(0);
        state
    }
}

fn oper_code(state: &State) -> u8 {
    match state {
        State::Unknown => 0,
        State::NotPresent => 1,
        State::Down => 2,
        State::LowerLayerDown => 3,
        State::Testing => 4,
        State::Dormant => 5,
        State::Up => IF_OPER_UP,
        State::Other(code) => *code,
        #[allow(unreachable_patterns)]
        _ => 0,
    }
}

/// A change reported on the kernel link feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// `RTM_NEWLINK`: the link appeared or one of its attributes changed.
    Changed(LinkState),
    /// `RTM_DELLINK`: the link is gone.
    Removed { index: u32, name: String },
}

impl LinkEvent {
    pub fn index(&self) -> u32 {
        match self {
            LinkEvent::Changed(link) => link.index,
            LinkEvent::Removed { index, .. } => *index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LinkEvent::Changed(link) => &link.name,
            LinkEvent::Removed { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(admin_up: bool, oper_state: u8, tx_packets: u64) -> LinkState {
        LinkState {
            index: 7,
            name: "tap0".to_string(),
            admin_up,
            oper_state,
            mac: vec![0x02, 0, 0, 0, 0, 0x07],
            tx_packets,
        }
    }

    #[test]
    fn test_readiness_truth_table() {
        for admin_up in [false, true] {
            for oper_state in 0..=7u8 {
                for tx_packets in [0u64, 1, 1_000_000] {
                    let expected = admin_up && oper_state == IF_OPER_UP && tx_packets > 0;
                    assert_eq!(
                        link(admin_up, oper_state, tx_packets).is_ready(),
                        expected,
                        "admin_up={admin_up} oper_state={oper_state} tx={tx_packets}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_from_message() {
        let mut msg = LinkMessage::default();
        msg.header.index = 12;
        msg.header.flags = vec![LinkFlag::Up, LinkFlag::Broadcast];
        msg.attributes = vec![
            LinkAttribute::IfName("tap.vm1".to_string()),
            LinkAttribute::OperState(State::Up),
            LinkAttribute::Address(vec![0x52, 0x54, 0, 0x12, 0x34, 0x56]),
        ];

        let state = LinkState::from_message(&msg);
        assert_eq!(state.index, 12);
        assert_eq!(state.name, "tap.vm1");
        assert!(state.admin_up);
        assert_eq!(state.oper_state, IF_OPER_UP);
        assert_eq!(state.mac, vec![0x52, 0x54, 0, 0x12, 0x34, 0x56]);
        assert_eq!(state.tx_packets, 0);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_from_message_admin_down() {
        let mut msg = LinkMessage::default();
        msg.header.index = 3;
        msg.attributes = vec![
            LinkAttribute::IfName("tap3".to_string()),
            LinkAttribute::OperState(State::Down),
        ];

        let state = LinkState::from_message(&msg);
        assert!(!state.admin_up);
        assert_eq!(state.oper_state, 2);
    }

    #[test]
    fn test_event_accessors() {
        let changed = LinkEvent::Changed(link(true, IF_OPER_UP, 1));
        assert_eq!(changed.index(), 7);
        assert_eq!(changed.name(), "tap0");

        let removed = LinkEvent::Removed {
            index: 9,
            name: "tap9".to_string(),
        };
        assert_eq!(removed.index(), 9);
        assert_eq!(removed.name(), "tap9");
    }
}
