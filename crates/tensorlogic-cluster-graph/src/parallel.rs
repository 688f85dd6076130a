//! Parallel message construction and absorption using rayon.
//!
//! Within one asynchronous round every send only touches its receiving
//! cluster, so messages are grouped by receiver and each receiver absorbs its
//! group on its own task. Order into a single receiver is the rank order.

use rayon::prelude::*;

use crate::cluster::Cluster;
use crate::error::Result;
use crate::factor::{Evidence, Factor};
use crate::message::Message;

/// Every outgoing message of every cluster, computed in parallel.
///
/// The result is in arena order, neighbours ascending, as in the sequential
/// sweep.
pub(crate) fn make_all_messages<F: Factor>(
    clusters: &[Cluster<F>],
    special_evidence: &Evidence<F::Value>,
) -> Result<Vec<Message<F>>> {
    let per_cluster: Vec<Vec<Message<F>>> = clusters
        .par_iter()
        .map(|cluster| {
            cluster
                .neighbours()
                .keys()
                .map(|&neighbour| cluster.make_message(neighbour, special_evidence))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(per_cluster.into_iter().flatten().collect())
}

/// Split `messages` into one inbox per cluster, keeping their order.
pub(crate) fn group_by_receiver<F: Factor>(
    messages: &[Message<F>],
    num_clusters: usize,
) -> Vec<Vec<&Message<F>>> {
    let mut inbox: Vec<Vec<&Message<F>>> = vec![Vec::new(); num_clusters];
    for message in messages {
        inbox[message.receiver].push(message);
    }
    inbox
}

/// Absorb each inbox into its cluster, one rayon task per cluster.
pub(crate) fn absorb_grouped<F: Factor>(
    clusters: &mut [Cluster<F>],
    inbox: &[Vec<&Message<F>>],
) -> Result<()> {
    clusters
        .par_iter_mut()
        .zip(inbox.par_iter())
        .try_for_each(|(cluster, messages)| {
            messages
                .iter()
                .try_for_each(|message| cluster.receive_message(message))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableFactor;
    use approx::assert_abs_diff_eq;

    fn clusters() -> Vec<Cluster<TableFactor>> {
        let ab = TableFactor::from_vec("ab", &["a", "b"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bc = TableFactor::from_vec("bc", &["b", "c"], &[2, 2], vec![1.0, 1.0, 2.0, 2.0]).unwrap();
        let mut clusters = vec![Cluster::new(0, ab), Cluster::new(1, bc)];
        let sep: crate::cluster::Separator = ["b".to_string()].into_iter().collect();
        clusters[0].add_neighbour(1, sep.clone()).unwrap();
        clusters[1].add_neighbour(0, sep).unwrap();
        clusters
    }

    #[test]
    fn test_parallel_messages_match_sequential() {
        let clusters = clusters();
        let evidence = Evidence::new();
        let parallel = make_all_messages(&clusters, &evidence).unwrap();

        let sequential: Vec<Message<TableFactor>> = clusters
            .iter()
            .flat_map(|c| {
                c.neighbours()
                    .keys()
                    .map(|&n| c.make_message(n, &evidence).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect();

        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_grouped_absorption() {
        let mut clusters = clusters();
        let messages = make_all_messages(&clusters, &Evidence::new()).unwrap();
        let inbox = group_by_receiver(&messages, clusters.len());
        assert_eq!(inbox[0].len(), 1);
        assert_eq!(inbox[1].len(), 1);

        absorb_grouped(&mut clusters, &inbox).unwrap();

        // cluster 1 received Σ_a ab = [4, 6] on b
        let bc = clusters[1].factor();
        assert_abs_diff_eq!(bc.values[[0, 0]], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(bc.values[[1, 1]], 12.0, epsilon = 1e-12);
    }
}
