//! End-to-end exercises of the dispatch and failover stack over the
//! in-process chain simulator.

use bmb_chain::sim::SimulatedChain;
use bmb_chain::{
    update_telemetry, BmbChain, BmbTelemetry, BmsError, ChainBus, ChainTopology, Port,
    RegisterBlock,
};

const NODES: usize = 4;
const REG: u16 = bmb_chain::constants::READ_CELL_REG[0];
const WRITE_REG: u16 = bmb_chain::constants::CMD_WRITE_CONFIG_A;
const START_ADC: u16 = bmb_chain::constants::CMD_START_ADC;

fn chain_of(sim: SimulatedChain) -> BmbChain<SimulatedChain> {
    BmbChain::new(sim, NODES)
}

fn tagged_block(tag: u8) -> RegisterBlock {
    [tag; 6]
}

#[test]
fn complete_ring_reads_all_nodes_in_chain_order() {
    let mut sim = SimulatedChain::new(NODES);
    for node in 0..NODES {
        sim.set_register(node, REG, tagged_block(node as u8 + 1));
    }
    let mut chain = chain_of(sim);
    assert_eq!(chain.enumerate().unwrap(), ChainTopology::Complete);

    let blocks = chain.read_all(REG, NODES).unwrap();
    for (node, block) in blocks.iter().enumerate() {
        assert_eq!(*block, tagged_block(node as u8 + 1));
    }
}

#[test]
fn origin_port_alternates_after_each_success() {
    let mut chain = chain_of(SimulatedChain::new(NODES));
    chain.enumerate().unwrap();
    assert_eq!(chain.state().origin_port(), Port::A);

    chain.command_all(START_ADC, NODES).unwrap();
    assert_eq!(chain.state().origin_port(), Port::B);
    chain.command_all(START_ADC, NODES).unwrap();
    assert_eq!(chain.state().origin_port(), Port::A);
}

#[test]
fn verified_write_lands_on_every_node() {
    let mut chain = chain_of(SimulatedChain::new(NODES));
    chain.enumerate().unwrap();

    let payload = tagged_block(0xA5);
    chain.write_all(WRITE_REG, NODES, &payload).unwrap();
    for node in 0..NODES {
        assert_eq!(chain.bus_mut().register(node, WRITE_REG), payload);
    }
}

#[test]
fn rejected_write_reports_the_offending_node_without_retry() {
    let mut sim = SimulatedChain::new(NODES);
    sim.set_reject_writes(2, true);
    let mut chain = chain_of(sim);
    chain.enumerate().unwrap();

    let err = chain.write_all(WRITE_REG, NODES, &tagged_block(0x5A)).unwrap_err();
    assert!(matches!(err, BmsError::WriteReject { node: 2 }));
}

#[test]
fn single_break_splits_reads_across_both_ports() {
    let mut sim = SimulatedChain::new(NODES);
    for node in 0..NODES {
        sim.set_register(node, REG, tagged_block(node as u8 + 0x10));
    }
    // break between nodes 2 and 3: A reaches three nodes, B reaches one
    sim.break_link(3);
    let mut chain = chain_of(sim);
    assert_eq!(chain.enumerate().unwrap(), ChainTopology::SingleBreak);
    assert_eq!(chain.state().available(Port::A), 3);
    assert_eq!(chain.state().available(Port::B), 1);

    let blocks = chain.read_all(REG, NODES).unwrap();
    for (node, block) in blocks.iter().enumerate() {
        assert_eq!(*block, tagged_block(node as u8 + 0x10), "node {node}");
    }
}

#[test]
fn single_break_write_covers_the_whole_pack() {
    let mut sim = SimulatedChain::new(NODES);
    sim.break_link(2);
    let mut chain = chain_of(sim);
    assert_eq!(chain.enumerate().unwrap(), ChainTopology::SingleBreak);

    let payload = tagged_block(0xC3);
    chain.write_all(WRITE_REG, NODES, &payload).unwrap();
    for node in 0..NODES {
        assert_eq!(chain.bus_mut().register(node, WRITE_REG), payload);
    }
}

#[test]
fn break_during_operation_triggers_failover_within_one_call() {
    let mut sim = SimulatedChain::new(NODES);
    for node in 0..NODES {
        sim.set_register(node, REG, tagged_block(node as u8 + 1));
    }
    let mut chain = chain_of(sim);
    assert_eq!(chain.enumerate().unwrap(), ChainTopology::Complete);

    // chain breaks after enumeration; the next read re-probes and splits
    chain.bus_mut().break_link(2);
    let blocks = chain.read_all(REG, NODES).unwrap();
    for (node, block) in blocks.iter().enumerate() {
        assert_eq!(*block, tagged_block(node as u8 + 1));
    }
    assert_eq!(chain.topology(), ChainTopology::SingleBreak);
}

#[test]
fn transient_corruption_is_retried_transparently() {
    let mut sim = SimulatedChain::new(NODES);
    for node in 0..NODES {
        sim.set_register(node, REG, tagged_block(node as u8 + 1));
    }
    let mut chain = chain_of(sim);
    chain.enumerate().unwrap();

    chain.bus_mut().corrupt_reads(1);
    let blocks = chain.read_all(REG, NODES).unwrap();
    assert_eq!(blocks[0], tagged_block(1));
}

#[test]
fn multiple_breaks_fail_even_when_both_segments_answer() {
    let mut sim = SimulatedChain::new(NODES);
    // two breaks strand the middle nodes
    sim.break_link(1);
    sim.break_link(3);
    let mut chain = chain_of(sim);
    assert_eq!(chain.enumerate().unwrap(), ChainTopology::MultipleBreak);

    let err = chain.read_all(REG, NODES).unwrap_err();
    assert!(matches!(err, BmsError::Crc));
}

#[test]
fn node_reset_surfaces_as_power_on_reset() {
    let mut chain = chain_of(SimulatedChain::new(NODES));
    chain.enumerate().unwrap();
    // move every counter off zero
    chain.command_all(START_ADC, NODES).unwrap();

    for node in 0..NODES {
        chain.bus_mut().reset_node(node);
    }
    let err = chain.read_all(REG, NODES).unwrap_err();
    assert!(matches!(err, BmsError::Por));
}

#[test]
fn counter_desync_resynchronizes_through_a_reset_command() {
    let mut chain = chain_of(SimulatedChain::new(NODES));
    chain.enumerate().unwrap();
    chain.command_all(START_ADC, NODES).unwrap();

    // slip every node one count ahead of the local bookkeeping
    let frame = {
        let cmd = START_ADC.to_be_bytes();
        let crc = bmb_chain::crc::compute_command_crc(&cmd).to_be_bytes();
        [cmd[0], cmd[1], crc[0], crc[1]]
    };
    let mut rx = [0u8; 4];
    chain.bus_mut().exchange(Port::A, &frame, &mut rx).unwrap();

    // the verified command detects the desync, resets both sides and
    // completes against the fresh counters
    chain.command_all(START_ADC, NODES).unwrap();
    assert_eq!(chain.bus_mut().node_counter(0), chain.state().counter(Port::A));
}

#[test]
fn failed_port_propagates_a_transport_error() {
    let mut sim = SimulatedChain::new(NODES);
    sim.fail_port(Port::A, true);
    sim.fail_port(Port::B, true);
    let mut chain = chain_of(sim);
    let err = chain.enumerate().unwrap_err();
    assert!(matches!(err, BmsError::Spi(_)));
}

#[test]
fn dual_port_streak_eventually_reprobes_a_repaired_chain() {
    let mut sim = SimulatedChain::new(NODES);
    for node in 0..NODES {
        sim.set_register(node, REG, tagged_block(1));
    }
    sim.break_link(2);
    let mut chain = chain_of(sim);
    assert_eq!(chain.enumerate().unwrap(), ChainTopology::SingleBreak);

    let streak = bmb_chain::constants::DUAL_TRANSACTIONS_BEFORE_RETRY;
    for _ in 0..streak - 1 {
        chain.read_all(REG, NODES).unwrap();
    }
    // the repair is not noticed until the streak forces a probe
    chain.bus_mut().repair_link(2);
    assert_eq!(chain.topology(), ChainTopology::SingleBreak);

    chain.read_all(REG, NODES).unwrap();
    assert_eq!(chain.topology(), ChainTopology::Complete);
}

#[test]
fn telemetry_survives_a_broken_chain() {
    let mut sim = SimulatedChain::new(NODES);
    for node in 0..NODES {
        sim.set_cell_voltages(node, &[3.8 + 0.01 * node as f32; 16]);
        sim.set_die_temp(node, 42.0);
        sim.set_board_temp(node, 40.0);
    }
    sim.break_link(2);
    let mut chain = chain_of(sim);
    chain.enumerate().unwrap();

    let mut bmbs = vec![BmbTelemetry::default(); NODES];
    update_telemetry(&mut chain, NODES, &mut bmbs).unwrap();
    for (node, bmb) in bmbs.iter().enumerate() {
        assert!(
            (bmb.avg_cell_voltage - (3.8 + 0.01 * node as f32)).abs() < 0.002,
            "node {node}: {}",
            bmb.avg_cell_voltage
        );
        assert_eq!(bmb.num_bad_channels, 0);
        assert!((bmb.board_temp - 40.0).abs() < 0.5);
        assert!((bmb.die_temp - 42.0).abs() < 1.0);
    }
}
