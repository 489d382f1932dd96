//! Drive a simulated four-node chain through a few acquisition cycles,
//! break a link partway through, and show the stack failing over.
//!
//! Run with: cargo run --example simulated_chain

use bmb_chain::sim::SimulatedChain;
use bmb_chain::{
    aggregate_pack, bleed_target, select_bleed_bricks, update_telemetry, BmbChain, BmbTelemetry,
    PackAlerts, PackSnapshot, SnapshotStore,
};

const NODE_COUNT: usize = 4;

fn main() -> bmb_chain::Result<()> {
    env_logger::init();

    let mut sim = SimulatedChain::new(NODE_COUNT);
    for node in 0..NODE_COUNT {
        let mut voltages = [3.75f32; 16];
        // stagger the voltages so balancing has something to do
        voltages[3] = 3.75 + 0.02 * node as f32 + 0.05;
        sim.set_cell_voltages(node, &voltages);
        sim.set_die_temp(node, 40.0 + node as f32);
        sim.set_board_temp(node, 38.0);
    }

    let mut chain = BmbChain::new(sim, NODE_COUNT);
    let topology = chain.enumerate()?;
    println!("chain enumerated: {:?}", topology);

    let store = SnapshotStore::new(NODE_COUNT);
    let mut alerts = PackAlerts::new(0);
    let mut snapshot = PackSnapshot::new(NODE_COUNT);
    let mut bmbs = vec![BmbTelemetry::default(); NODE_COUNT];

    for cycle in 0u32..6 {
        if cycle == 3 {
            println!("--- breaking the link between nodes 1 and 2 ---");
            chain.bus_mut().break_link(2);
        }

        update_telemetry(&mut chain, NODE_COUNT, &mut bmbs)?;
        aggregate_pack(&bmbs, &mut snapshot.pack);
        alerts.update(&snapshot.pack, cycle * 100);

        let target = bleed_target(snapshot.pack.min_cell_voltage);
        for (node, bmb) in bmbs.iter().enumerate() {
            snapshot.balancing[node] = select_bleed_bricks(bmb, target);
        }
        snapshot.bmbs = bmbs.clone();
        snapshot.topology = chain.topology();
        store.publish(&snapshot);

        let published = store.read();
        println!(
            "cycle {}: topology {:?}, pack {:.3}V..{:.3}V avg {:.3}V, bad channels {}",
            cycle,
            published.topology,
            published.pack.min_cell_voltage,
            published.pack.max_cell_voltage,
            published.pack.avg_cell_voltage,
            published.pack.num_bad_channels,
        );
        for (node, state) in published.balancing.iter().enumerate() {
            let bleeding: Vec<usize> = (0..16).filter(|&i| state.enabled[i]).collect();
            if !bleeding.is_empty() {
                println!("  node {} bleeding bricks {:?}", node, bleeding);
            }
        }
    }

    let responses = alerts.responses();
    println!("alert responses: {:?}", responses);
    Ok(())
}
