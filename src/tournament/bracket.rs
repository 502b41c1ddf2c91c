//! Bracket construction and progression
//!
//! Pure algorithms over a tournament's match rows: seed placement,
//! winner advancement, bye resolution, and stalled-match arbitration.
//! The store owns the rows and the locking; everything here takes them
//! by mutable reference.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::time::STALLED_MATCH_TIMEOUT_SECS;

use super::store::{MatchStatus, TournamentMatch};

/// Smallest power of two that seats `players` (never below 2)
pub fn bracket_size(players: u32) -> u32 {
    players.max(2).next_power_of_two()
}

/// Final round number for a bracket of `players`
pub fn max_round(players: u32) -> u32 {
    bracket_size(players).trailing_zeros()
}

/// Seed placement order for a bracket of `size` slots.
///
/// Position `i` of the result is the seed assigned to slot `i`; round-1
/// match `k` pairs slots `2k` and `2k+1`. Top seeds land in opposite
/// halves so they can only meet in the final.
pub fn generate_seed_order(size: u32) -> Vec<u32> {
    match size {
        1 => vec![1],
        2 => vec![1, 2],
        4 => vec![1, 4, 3, 2],
        _ => {
            let mut order = Vec::with_capacity(size as usize);
            for seed in generate_seed_order(size / 2) {
                order.push(seed);
                order.push(size + 1 - seed);
            }
            order
        }
    }
}

fn find_match_mut(
    matches: &mut [TournamentMatch],
    round: u32,
    match_index: u32,
) -> Option<&mut TournamentMatch> {
    matches
        .iter_mut()
        .find(|m| m.round == round && m.match_index == match_index)
}

fn find_match(matches: &[TournamentMatch], round: u32, match_index: u32) -> Option<&TournamentMatch> {
    matches
        .iter()
        .find(|m| m.round == round && m.match_index == match_index)
}

/// Place `winner_id` into its next-round slot.
///
/// The winner of match `i` goes to match `i / 2` of the next round; an even
/// index feeds the left slot, an odd one the right. The target row is
/// created on first use. An already-occupied slot is left untouched.
pub fn advance_winner(
    matches: &mut Vec<TournamentMatch>,
    tournament_id: Uuid,
    round: u32,
    match_index: u32,
    winner_id: i64,
    max_round: u32,
    next_id: &mut i64,
    now: DateTime<Utc>,
) {
    if round >= max_round {
        // Final match; nowhere further to go
        return;
    }

    let next_round = round + 1;
    let next_index = match_index / 2;

    let target = match matches
        .iter()
        .position(|m| m.round == next_round && m.match_index == next_index)
    {
        Some(i) => &mut matches[i],
        None => {
            let id = *next_id;
            *next_id += 1;
            matches.push(TournamentMatch {
                id,
                tournament_id,
                round: next_round,
                match_index: next_index,
                left_player: None,
                right_player: None,
                winner_id: None,
                left_score: 0,
                right_score: 0,
                status: MatchStatus::Pending,
                created_at: now,
            });
            let last = matches.len() - 1;
            &mut matches[last]
        }
    };

    let slot = if match_index % 2 == 0 {
        &mut target.left_player
    } else {
        &mut target.right_player
    };

    match slot {
        None => *slot = Some(winner_id),
        Some(existing) => {
            warn!(
                tournament_id = %tournament_id,
                round = next_round,
                match_index = next_index,
                existing,
                winner_id,
                "Advancement slot already occupied, keeping existing player"
            );
        }
    }
}

fn finish_as_walkover(m: &mut TournamentMatch, winner_id: i64) {
    m.winner_id = Some(winner_id);
    m.left_score = 0;
    m.right_score = 0;
    m.status = MatchStatus::Finished;
}

/// Resolve every match that can no longer get a second player.
///
/// A pending match with exactly one player is a bye when the empty side
/// is provably unfillable: always in round 1, and in later rounds once
/// both feeder matches have finished. Resolved byes advance their winner,
/// which can expose further byes, so resolution loops until a full pass
/// makes no progress. Returns the number of byes resolved.
pub fn resolve_byes(
    matches: &mut Vec<TournamentMatch>,
    tournament_id: Uuid,
    max_round: u32,
    next_id: &mut i64,
    now: DateTime<Utc>,
) -> u32 {
    let mut resolved = 0;

    loop {
        let mut progressed = false;

        let candidates: Vec<(u32, u32)> = matches
            .iter()
            .filter(|m| m.status == MatchStatus::Pending)
            .filter(|m| m.left_player.is_some() != m.right_player.is_some())
            .filter(|m| {
                if m.round == 1 {
                    return true;
                }
                // The empty slot may still fill while a feeder is undecided
                let feeder = |idx| {
                    find_match(matches, m.round - 1, idx)
                        .map(|f| f.status == MatchStatus::Finished)
                        .unwrap_or(false)
                };
                feeder(m.match_index * 2) && feeder(m.match_index * 2 + 1)
            })
            .map(|m| (m.round, m.match_index))
            .collect();

        for (round, match_index) in candidates {
            let Some(m) = find_match_mut(matches, round, match_index) else {
                continue;
            };
            let Some(winner_id) = m.left_player.or(m.right_player) else {
                continue;
            };
            finish_as_walkover(m, winner_id);

            info!(
                tournament_id = %tournament_id,
                round,
                match_index,
                winner_id,
                "Bye resolved"
            );

            advance_winner(
                matches,
                tournament_id,
                round,
                match_index,
                winner_id,
                max_round,
                next_id,
                now,
            );
            resolved += 1;
            progressed = true;
        }

        if !progressed {
            break;
        }
    }

    resolved
}

/// Arbitrate matches that have had both players assigned for too long
/// without starting.
///
/// A pending match older than the stall window is awarded to the
/// better-seeded player with a 0-0 score, so an abandoned match cannot
/// block the bracket forever. Players without a recorded seed lose to
/// any seeded player; a full tie goes to the left slot. Returns the
/// number of matches arbitrated.
pub fn resolve_stalled(
    matches: &mut Vec<TournamentMatch>,
    seeds: &HashMap<i64, u32>,
    tournament_id: Uuid,
    max_round: u32,
    next_id: &mut i64,
    now: DateTime<Utc>,
) -> u32 {
    let cutoff = chrono::Duration::seconds(STALLED_MATCH_TIMEOUT_SECS);

    let stalled: Vec<(u32, u32)> = matches
        .iter()
        .filter(|m| m.status == MatchStatus::Pending)
        .filter(|m| m.left_player.is_some() && m.right_player.is_some())
        .filter(|m| now - m.created_at >= cutoff)
        .map(|m| (m.round, m.match_index))
        .collect();

    let mut resolved = 0;

    for (round, match_index) in stalled {
        let Some(m) = find_match_mut(matches, round, match_index) else {
            continue;
        };
        let (Some(left), Some(right)) = (m.left_player, m.right_player) else {
            continue;
        };

        let seed_of = |player: i64| seeds.get(&player).copied().unwrap_or(u32::MAX);
        let winner_id = if seed_of(right) < seed_of(left) {
            right
        } else {
            left
        };
        finish_as_walkover(m, winner_id);

        warn!(
            tournament_id = %tournament_id,
            round,
            match_index,
            winner_id,
            "Stalled match arbitrated to better seed"
        );

        advance_winner(
            matches,
            tournament_id,
            round,
            match_index,
            winner_id,
            max_round,
            next_id,
            now,
        );
        resolved += 1;
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        id: i64,
        round: u32,
        match_index: u32,
        left: Option<i64>,
        right: Option<i64>,
    ) -> TournamentMatch {
        TournamentMatch {
            id,
            tournament_id: Uuid::nil(),
            round,
            match_index,
            left_player: left,
            right_player: right,
            winner_id: None,
            left_score: 0,
            right_score: 0,
            status: MatchStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn bracket_size_rounds_up_to_a_power_of_two() {
        assert_eq!(bracket_size(2), 2);
        assert_eq!(bracket_size(3), 4);
        assert_eq!(bracket_size(4), 4);
        assert_eq!(bracket_size(5), 8);
        assert_eq!(bracket_size(8), 8);
        assert_eq!(bracket_size(9), 16);
    }

    #[test]
    fn max_round_is_log2_of_the_bracket() {
        assert_eq!(max_round(2), 1);
        assert_eq!(max_round(4), 2);
        assert_eq!(max_round(5), 3);
        assert_eq!(max_round(8), 3);
        assert_eq!(max_round(16), 4);
    }

    #[test]
    fn seed_order_keeps_top_seeds_apart() {
        assert_eq!(generate_seed_order(2), vec![1, 2]);
        assert_eq!(generate_seed_order(4), vec![1, 4, 3, 2]);
        assert_eq!(generate_seed_order(8), vec![1, 8, 4, 5, 3, 6, 2, 7]);

        // Every bracket is a permutation of 1..=size
        for size in [2u32, 4, 8, 16, 32] {
            let mut order = generate_seed_order(size);
            order.sort_unstable();
            assert_eq!(order, (1..=size).collect::<Vec<_>>());
        }
    }

    #[test]
    fn winner_advances_to_half_index_with_parity_slot() {
        let mut matches = vec![row(1, 1, 2, Some(10), Some(11))];
        let mut next_id = 2;

        advance_winner(&mut matches, Uuid::nil(), 1, 2, 10, 3, &mut next_id, Utc::now());

        let target = find_match(&matches, 2, 1).expect("round-2 match created");
        assert_eq!(target.left_player, Some(10)); // even index feeds left
        assert_eq!(target.right_player, None);

        advance_winner(&mut matches, Uuid::nil(), 1, 3, 12, 3, &mut next_id, Utc::now());
        let target = find_match(&matches, 2, 1).expect("same match reused");
        assert_eq!(target.right_player, Some(12)); // odd index feeds right
    }

    #[test]
    fn occupied_slot_is_not_overwritten() {
        let mut matches = vec![row(1, 1, 0, Some(10), Some(11))];
        let mut next_id = 2;

        advance_winner(&mut matches, Uuid::nil(), 1, 0, 10, 2, &mut next_id, Utc::now());
        advance_winner(&mut matches, Uuid::nil(), 1, 0, 11, 2, &mut next_id, Utc::now());

        let target = find_match(&matches, 2, 0).unwrap();
        assert_eq!(target.left_player, Some(10));
    }

    #[test]
    fn final_round_winner_goes_nowhere() {
        let mut matches = vec![row(1, 2, 0, Some(10), Some(11))];
        let mut next_id = 2;

        advance_winner(&mut matches, Uuid::nil(), 2, 0, 10, 2, &mut next_id, Utc::now());
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn five_player_bracket_cascades_byes() {
        // Seeds 1..=5 in an 8-slot bracket; slots [1,8,4,5,3,6,2,7] give
        // round-1 pairs (1,-), (4,5), (3,-), (2,-)
        let mut matches = vec![
            row(1, 1, 0, Some(1), None),
            row(2, 1, 1, Some(4), Some(5)),
            row(3, 1, 2, Some(3), None),
            row(4, 1, 3, Some(2), None),
        ];
        let mut next_id = 5;
        let now = Utc::now();

        let resolved = resolve_byes(&mut matches, Uuid::nil(), 3, &mut next_id, now);
        assert_eq!(resolved, 3);

        // Seeds 3 and 2 both advanced into (2,1), which now has two
        // players and must be played out.
        let semifinal = find_match(&matches, 2, 1).expect("second semifinal exists");
        assert_eq!(semifinal.left_player, Some(3));
        assert_eq!(semifinal.right_player, Some(2));
        assert_eq!(semifinal.status, MatchStatus::Pending);

        // Seed 1 waits in (2,0) for the winner of (4,5); not a bye yet
        let waiting = find_match(&matches, 2, 0).expect("first semifinal exists");
        assert_eq!(waiting.left_player, Some(1));
        assert_eq!(waiting.right_player, None);
        assert_eq!(waiting.status, MatchStatus::Pending);
    }

    #[test]
    fn later_round_bye_waits_for_both_feeders() {
        // (2,0) has seed 1 and an empty right slot; feeder (1,1) is still
        // pending, so no bye may fire.
        let mut matches = vec![
            row(1, 1, 0, Some(1), None),
            row(2, 1, 1, Some(4), Some(5)),
        ];
        let mut next_id = 3;
        let now = Utc::now();

        resolve_byes(&mut matches, Uuid::nil(), 3, &mut next_id, now);
        let semifinal = find_match(&matches, 2, 0).unwrap();
        assert_eq!(semifinal.status, MatchStatus::Pending);

        // Feeder finishes; still not a bye, advancement fills the slot
        let feeder = find_match_mut(&mut matches, 1, 1).unwrap();
        feeder.winner_id = Some(5);
        feeder.status = MatchStatus::Finished;
        advance_winner(&mut matches, Uuid::nil(), 1, 1, 5, 3, &mut next_id, now);

        let semifinal = find_match(&matches, 2, 0).unwrap();
        assert_eq!(semifinal.right_player, Some(5));
    }

    #[test]
    fn stalled_match_goes_to_the_better_seed() {
        let old = Utc::now() - chrono::Duration::seconds(STALLED_MATCH_TIMEOUT_SECS + 1);
        let mut stale = row(1, 1, 0, Some(10), Some(11));
        stale.created_at = old;
        let mut matches = vec![stale];
        let mut next_id = 2;

        let seeds = HashMap::from([(10i64, 4u32), (11i64, 1u32)]);
        let resolved = resolve_stalled(
            &mut matches,
            &seeds,
            Uuid::nil(),
            2,
            &mut next_id,
            Utc::now(),
        );

        assert_eq!(resolved, 1);
        let m = find_match(&matches, 1, 0).unwrap();
        assert_eq!(m.winner_id, Some(11));
        assert_eq!((m.left_score, m.right_score), (0, 0));
        assert_eq!(m.status, MatchStatus::Finished);
    }

    #[test]
    fn fresh_and_one_sided_matches_never_stall() {
        let old = Utc::now() - chrono::Duration::seconds(STALLED_MATCH_TIMEOUT_SECS + 1);
        let mut one_sided = row(1, 1, 0, Some(10), None);
        one_sided.created_at = old;

        let fresh = row(2, 1, 1, Some(11), Some(12));
        let mut matches = vec![one_sided, fresh];
        let mut next_id = 3;

        let resolved = resolve_stalled(
            &mut matches,
            &HashMap::new(),
            Uuid::nil(),
            2,
            &mut next_id,
            Utc::now(),
        );
        assert_eq!(resolved, 0);
    }

    #[test]
    fn unseeded_players_tie_breaks_to_the_left_slot() {
        let old = Utc::now() - chrono::Duration::seconds(STALLED_MATCH_TIMEOUT_SECS + 1);
        let mut stale = row(1, 1, 0, Some(10), Some(11));
        stale.created_at = old;
        let mut matches = vec![stale];
        let mut next_id = 2;

        resolve_stalled(
            &mut matches,
            &HashMap::new(),
            Uuid::nil(),
            2,
            &mut next_id,
            Utc::now(),
        );
        assert_eq!(find_match(&matches, 1, 0).unwrap().winner_id, Some(10));
    }
}
