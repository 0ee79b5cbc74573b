//! `inspect` command.

use crate::{
    domain::StabilityClass, network::HomologyNetwork, stratify::topology_groups,
};

use super::{print_json, InputArgs};

/// Print topology group and homology component statistics.
pub(crate) fn cmd_inspect(
    input: &InputArgs,
    threshold: usize,
    top: usize,
    format: &str,
) -> crate::Result<()> {
    let store = input.load()?;
    let groups = topology_groups(&store);
    let network = HomologyNetwork::build(&store);

    let clustered = groups.values().filter(|g| g.len() >= threshold).count();
    let mut largest_groups: Vec<(String, usize)> = groups
        .iter()
        .map(|(k, v)| (k.to_string(), v.len()))
        .collect();
    largest_groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    largest_groups.truncate(top);

    let singletons = network.components().iter().filter(|c| c.len() == 1).count();
    let mut largest_components: Vec<(String, usize)> = network
        .components()
        .iter()
        .map(|members| (store.domains()[members[0]].id().to_string(), members.len()))
        .collect();
    largest_components.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    largest_components.truncate(top);

    let stability: Vec<(StabilityClass, usize)> = StabilityClass::ALL
        .into_iter()
        .map(|class| {
            (
                class,
                store.domains().iter().filter(|d| d.stability() == class).count(),
            )
        })
        .collect();

    if format == "json" {
        return print_json(&serde_json::json!({
            "domains": store.len(),
            "features": store.feature_names(),
            "topology_groups": groups.len(),
            "clustered_groups": clustered,
            "largest_groups": largest_groups
                .iter()
                .map(|(k, n)| serde_json::json!({"topology": k, "size": n}))
                .collect::<Vec<_>>(),
            "components": network.len(),
            "singleton_components": singletons,
            "largest_components": largest_components
                .iter()
                .map(|(id, n)| serde_json::json!({"first_domain": id, "size": n}))
                .collect::<Vec<_>>(),
            "stability": stability
                .iter()
                .map(|(c, n)| (c.name().to_string(), serde_json::json!(n)))
                .collect::<serde_json::Map<_, _>>(),
        }));
    }

    println!("Domain Collection");
    println!("=================");
    println!("Domains:            {}", store.len());
    println!("Features:           {}", store.feature_names().join(", "));
    println!(
        "Topology groups:    {} ({} with >= {} domains)",
        groups.len(),
        clustered,
        threshold
    );
    println!(
        "Homology components: {} ({} singletons, largest {})",
        network.len(),
        singletons,
        network.largest()
    );
    println!();

    println!("{:<20} SIZE", "TOPOLOGY");
    println!("{}", "-".repeat(26));
    for (key, size) in &largest_groups {
        println!("{:<20} {}", key, size);
    }
    println!();

    println!("{:<20} SIZE", "COMPONENT (FIRST ID)");
    println!("{}", "-".repeat(26));
    for (id, size) in &largest_components {
        println!("{:<20} {}", id, size);
    }
    println!();

    for (class, count) in &stability {
        println!("{:<10} {}", class.name(), count);
    }

    Ok(())
}
