//! Team balancing for two-team pickup games
//!
//! From the pool of queued players, build the two teams that minimize the
//! difference of average skill. Partitions are enumerated per class (1v1 and
//! 2v2 quotas), combined across classes, scored, and ties broken at random.
//! Friend pairs are honored when some minimal-score split allows it.

use crate::error::{PickupError, Result};
use crate::queue::slot::QueueSlot;
use crate::types::{GamePlayer, PlayerId, PlayerStatus};
use rand::seq::SliceRandom;
use tracing::debug;

const SCORE_EPSILON: f64 = 1e-9;

/// One player of the balancing pool, with the skill for their game class
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSlot {
    pub player_id: PlayerId,
    pub game_class: String,
    pub skill: f64,
}

/// Candidate split, holding indices into the player pool per team
#[derive(Debug, Clone)]
struct Candidate {
    team0: Vec<usize>,
    team1: Vec<usize>,
}

impl Candidate {
    fn score(&self, players: &[PlayerSlot]) -> f64 {
        let avg = |team: &[usize]| {
            team.iter().map(|&i| players[i].skill).sum::<f64>() / team.len() as f64
        };
        (avg(&self.team0) - avg(&self.team1)).abs()
    }

    fn team_of(&self, players: &[PlayerSlot], player_id: &str) -> Option<u32> {
        if self
            .team0
            .iter()
            .any(|&i| players[i].player_id == player_id)
        {
            Some(0)
        } else if self
            .team1
            .iter()
            .any(|&i| players[i].player_id == player_id)
        {
            Some(1)
        } else {
            None
        }
    }
}

/// From the given pool of players, make the two teams with the smallest
/// average skill difference
pub fn pick_teams(
    players: &[PlayerSlot],
    class_order: &[String],
    friends: &[(PlayerId, PlayerId)],
) -> Result<Vec<GamePlayer>> {
    let mut candidates = vec![Candidate {
        team0: Vec::new(),
        team1: Vec::new(),
    }];

    for game_class in class_order {
        let of_class: Vec<usize> = players
            .iter()
            .enumerate()
            .filter(|(_, p)| p.game_class == *game_class)
            .map(|(i, _)| i)
            .collect();

        let partitions = class_partitions(&of_class).ok_or_else(|| {
            PickupError::ConfigurationError {
                message: format!(
                    "class {} has {} players; only 1v1 and 2v2 quotas are supported",
                    game_class,
                    of_class.len()
                ),
            }
        })?;

        let mut combined = Vec::with_capacity(candidates.len() * partitions.len());
        for candidate in &candidates {
            for (a, b) in &partitions {
                let mut next = candidate.clone();
                next.team0.extend_from_slice(a);
                next.team1.extend_from_slice(b);
                combined.push(next);
            }
        }
        candidates = combined;
    }

    let best_score = candidates
        .iter()
        .map(|c| c.score(players))
        .fold(f64::INFINITY, f64::min);
    let minimal: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.score(players) <= best_score + SCORE_EPSILON)
        .collect();

    // Prefer splits keeping every friend pair together; fall back to the
    // unconstrained minimal set when none does
    let preferred: Vec<&Candidate> = minimal
        .iter()
        .filter(|c| satisfies_friends(c, players, friends))
        .collect();
    let pool: Vec<&Candidate> = if preferred.is_empty() {
        minimal.iter().collect()
    } else {
        preferred
    };

    let selected = pool
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| PickupError::InternalError {
            message: "no team split candidates".to_string(),
        })?;

    debug!(
        "team average skill difference = {}",
        selected.score(players)
    );

    Ok(players
        .iter()
        .enumerate()
        .map(|(i, p)| GamePlayer {
            player_id: p.player_id.clone(),
            game_class: p.game_class.clone(),
            team_id: if selected.team0.contains(&i) { 0 } else { 1 },
            status: PlayerStatus::Active,
        })
        .collect())
}

/// Enumerate every way to split one class's players into the two team-sized
/// groups; `None` when the class size is not 2 or 4
fn class_partitions(of_class: &[usize]) -> Option<Vec<(Vec<usize>, Vec<usize>)>> {
    match of_class.len() {
        2 => Some(vec![
            (vec![of_class[0]], vec![of_class[1]]),
            (vec![of_class[1]], vec![of_class[0]]),
        ]),
        4 => {
            let mut partitions = Vec::with_capacity(6);
            for i in 0..of_class.len() - 1 {
                for j in i + 1..of_class.len() {
                    let a: Vec<usize> = vec![of_class[i], of_class[j]];
                    let b: Vec<usize> = of_class
                        .iter()
                        .copied()
                        .filter(|k| *k != of_class[i] && *k != of_class[j])
                        .collect();
                    partitions.push((a, b));
                }
            }
            Some(partitions)
        }
        _ => None,
    }
}

fn satisfies_friends(
    candidate: &Candidate,
    players: &[PlayerSlot],
    friends: &[(PlayerId, PlayerId)],
) -> bool {
    friends.iter().all(|(a, b)| {
        match (
            candidate.team_of(players, a),
            candidate.team_of(players, b),
        ) {
            (Some(team_a), Some(team_b)) => team_a == team_b,
            // Pairs referencing players outside the pool do not constrain
            _ => true,
        }
    })
}

/// Extract friend pairs from queue slots
///
/// Only slots of the designated friend class contribute; pairs naming a
/// player who is not in the roster, or another friend-class player, are
/// dropped.
pub fn extract_friends(
    slots: &[QueueSlot],
    friend_class: Option<&str>,
) -> Vec<(PlayerId, PlayerId)> {
    let Some(friend_class) = friend_class else {
        return Vec::new();
    };

    slots
        .iter()
        .filter(|slot| slot.game_class == friend_class)
        .filter_map(|slot| {
            let player_id = slot.player_id.clone()?;
            let friend_id = slot.friend_player_id.clone()?;
            let friend_slot = slots
                .iter()
                .find(|s| s.player_id.as_deref() == Some(friend_id.as_str()))?;
            if friend_slot.game_class == friend_class {
                return None;
            }
            Some((player_id, friend_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::slot::build_slots;

    fn slot(player_id: &str, game_class: &str, skill: f64) -> PlayerSlot {
        PlayerSlot {
            player_id: player_id.to_string(),
            game_class: game_class.to_string(),
            skill,
        }
    }

    fn team_ids(result: &[GamePlayer], player_id: &str) -> u32 {
        result
            .iter()
            .find(|p| p.player_id == player_id)
            .unwrap()
            .team_id
    }

    #[test]
    fn test_team_sizes_match_configuration() {
        let players = vec![
            slot("s1", "soldier", 1.0),
            slot("s2", "soldier", 2.0),
            slot("s3", "soldier", 3.0),
            slot("s4", "soldier", 4.0),
            slot("m1", "medic", 2.0),
            slot("m2", "medic", 5.0),
        ];
        let classes = vec!["soldier".to_string(), "medic".to_string()];
        let result = pick_teams(&players, &classes, &[]).unwrap();

        assert_eq!(result.len(), 6);
        for team in [0, 1] {
            assert_eq!(result.iter().filter(|p| p.team_id == team).count(), 3);
            assert_eq!(
                result
                    .iter()
                    .filter(|p| p.team_id == team && p.game_class == "soldier")
                    .count(),
                2
            );
        }
        assert!(result.iter().all(|p| p.status == PlayerStatus::Active));
    }

    #[test]
    fn test_minimal_skill_difference_split_is_selected() {
        // Skills [1,2,3,4] must split {1,4} vs {2,3}, both averaging 2.5
        let players = vec![
            slot("a", "soldier", 1.0),
            slot("b", "soldier", 2.0),
            slot("c", "soldier", 3.0),
            slot("d", "soldier", 4.0),
        ];
        let classes = vec!["soldier".to_string()];
        let result = pick_teams(&players, &classes, &[]).unwrap();

        assert_eq!(team_ids(&result, "a"), team_ids(&result, "d"));
        assert_eq!(team_ids(&result, "b"), team_ids(&result, "c"));
        assert_ne!(team_ids(&result, "a"), team_ids(&result, "b"));
    }

    #[test]
    fn test_chosen_split_beats_every_other_candidate() {
        let players = vec![
            slot("a", "scout", 3.0),
            slot("b", "scout", 7.0),
            slot("c", "scout", 2.0),
            slot("d", "scout", 8.0),
            slot("e", "demoman", 4.0),
            slot("f", "demoman", 6.0),
        ];
        let classes = vec!["scout".to_string(), "demoman".to_string()];
        let result = pick_teams(&players, &classes, &[]).unwrap();

        let avg = |team: u32| {
            let members: Vec<&PlayerSlot> = players
                .iter()
                .filter(|p| team_ids(&result, &p.player_id) == team)
                .collect();
            members.iter().map(|p| p.skill).sum::<f64>() / members.len() as f64
        };
        let chosen_difference = (avg(0) - avg(1)).abs();

        // Scouts 3+8 with demoman 4 against scouts 7+2 with demoman 6 is a
        // perfectly even split, so the chosen one must be too
        assert!(chosen_difference < 1e-9);
    }

    #[test]
    fn test_friend_pair_kept_together_among_ties() {
        // All skills equal, so every candidate is minimal; the friend pair
        // must decide
        let players = vec![
            slot("s1", "soldier", 1.0),
            slot("s2", "soldier", 1.0),
            slot("s3", "soldier", 1.0),
            slot("s4", "soldier", 1.0),
            slot("m1", "medic", 1.0),
            slot("m2", "medic", 1.0),
        ];
        let classes = vec!["soldier".to_string(), "medic".to_string()];
        let friends = vec![("m1".to_string(), "s1".to_string())];

        for _ in 0..10 {
            let result = pick_teams(&players, &classes, &friends).unwrap();
            assert_eq!(team_ids(&result, "m1"), team_ids(&result, "s1"));
        }
    }

    #[test]
    fn test_unsatisfiable_friends_fall_back_to_minimal_set() {
        // A 1v1 class can never host both friends on one team
        let players = vec![slot("a", "demoman", 1.0), slot("b", "demoman", 1.0)];
        let classes = vec!["demoman".to_string()];
        let friends = vec![("a".to_string(), "b".to_string())];

        let result = pick_teams(&players, &classes, &friends).unwrap();
        assert_ne!(team_ids(&result, "a"), team_ids(&result, "b"));
    }

    #[test]
    fn test_unsupported_class_size_is_rejected() {
        let players = vec![
            slot("a", "scout", 1.0),
            slot("b", "scout", 1.0),
            slot("c", "scout", 1.0),
        ];
        let classes = vec!["scout".to_string()];
        assert!(pick_teams(&players, &classes, &[]).is_err());
    }

    fn occupied(slots: &mut [QueueSlot], index: usize, player_id: &str) {
        slots[index].player_id = Some(player_id.to_string());
    }

    #[test]
    fn test_extract_friends_matches_pairs() {
        let config = QueueConfig::sixes();
        let mut slots = build_slots(&config);
        occupied(&mut slots, 4, "solly"); // soldier slot
        occupied(&mut slots, 10, "medic"); // medic slot
        slots[10].friend_player_id = Some("solly".to_string());

        let friends = extract_friends(&slots, Some("medic"));
        assert_eq!(
            friends,
            vec![("medic".to_string(), "solly".to_string())]
        );
    }

    #[test]
    fn test_extract_friends_only_considers_friend_class() {
        let config = QueueConfig::sixes();
        let mut slots = build_slots(&config);
        occupied(&mut slots, 4, "solly");
        occupied(&mut slots, 8, "demo"); // demoman slot
        slots[8].friend_player_id = Some("solly".to_string());

        assert!(extract_friends(&slots, Some("medic")).is_empty());
    }

    #[test]
    fn test_extract_friends_drops_absent_targets() {
        let config = QueueConfig::sixes();
        let mut slots = build_slots(&config);
        occupied(&mut slots, 10, "medic");
        slots[10].friend_player_id = Some("stranger".to_string());

        assert!(extract_friends(&slots, Some("medic")).is_empty());
    }

    #[test]
    fn test_extract_friends_never_pairs_two_medics() {
        let config = QueueConfig::sixes();
        let mut slots = build_slots(&config);
        occupied(&mut slots, 10, "medic-1");
        occupied(&mut slots, 11, "medic-2");
        slots[10].friend_player_id = Some("medic-2".to_string());
        slots[11].friend_player_id = Some("medic-1".to_string());

        assert!(extract_friends(&slots, Some("medic")).is_empty());
    }

    #[test]
    fn test_extract_friends_without_friend_class() {
        let config = QueueConfig::sixes();
        let slots = build_slots(&config);
        assert!(extract_friends(&slots, None).is_empty());
    }
}
