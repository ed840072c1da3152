use mix_kit::fixed::{FRAC_BITS, FRAC_HALF, FRAC_ONE};
use mix_kit::{Bookkeeping, FixedFrame, PositionManager, TimelineRate};

const RATE_PAIRS: &[(u64, u64)] = &[
    (1, 1),
    (2, 3),
    (3, 2),
    (1, 3),
    (11, 7),
    (44_100, 48_000),
    (48_000, 44_100),
    (96_000, 44_100),
    (8_000, 192_000),
];

fn bookkeeping_for(source_rate: u64, dest_rate: u64) -> Bookkeeping {
    let mut bookkeeping = Bookkeeping::new();
    bookkeeping.set_rate_from(TimelineRate::new(source_rate << FRAC_BITS, dest_rate));
    bookkeeping
}

fn manager(
    widths: (i64, i64),
    bookkeeping: &Bookkeeping,
    dest: (usize, usize),
    source: (usize, i64),
) -> PositionManager {
    let mut manager =
        PositionManager::new(FixedFrame::from_raw(widths.0), FixedFrame::from_raw(widths.1));
    manager.set_dest_values(dest.0, dest.1);
    manager.set_source_values(source.0, FixedFrame::from_raw(source.1));
    manager.set_rate_values(bookkeeping);
    manager
}

#[test]
fn advance_to_end_matches_repeated_advance_one() {
    let widths = [(FRAC_HALF - 1, FRAC_HALF), ((12 << FRAC_BITS) - 1, 12 << FRAC_BITS)];
    let source_offsets = [0, 1, FRAC_HALF, -(FRAC_HALF - 1), 3 * FRAC_ONE + 77];

    for &(source_rate, dest_rate) in RATE_PAIRS {
        let mut bookkeeping = bookkeeping_for(source_rate, dest_rate);
        for &width in &widths {
            for &source_offset in &source_offsets {
                let denominator = bookkeeping.denominator();
                for seed in [0u64, 1, denominator - 1].into_iter().filter(|seed| *seed < denominator) {
                    bookkeeping.set_source_pos_modulo(seed);
                    for &(dest_frames, source_frames) in &[(1, 40), (64, 40), (480, 441), (7, 1_000)]
                    {
                        let dest = (dest_frames, 0);
                        let source = (source_frames, source_offset);

                        let mut stepped = manager(width, &bookkeeping, dest, source);
                        let mut steps = 0;
                        while stepped.frame_can_be_mixed() {
                            stepped.advance_one();
                            steps += 1;
                        }

                        let mut jumped = manager(width, &bookkeeping, dest, source);
                        let advanced = jumped.advance_to_end();

                        let case = format!(
                            "{source_rate}->{dest_rate} width {width:?} offset {source_offset} \
                             seed {seed} dest {dest_frames} source {source_frames}"
                        );
                        assert_eq!(advanced, steps, "{case}");
                        assert_eq!(jumped.dest_offset(), stepped.dest_offset(), "{case}");
                        assert_eq!(jumped.source_offset(), stepped.source_offset(), "{case}");
                        assert_eq!(
                            jumped.source_pos_modulo(),
                            stepped.source_pos_modulo(),
                            "{case}"
                        );
                        assert_eq!(
                            jumped.source_is_consumed(),
                            stepped.source_is_consumed(),
                            "{case}"
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn remainder_carries_into_source_position() {
    let mut bookkeeping = Bookkeeping::new();
    bookkeeping.set_rate(FixedFrame::ONE, 1, 3);

    let mut manager = manager((0, 1), &bookkeeping, (10, 0), (100, 0));
    manager.advance_one();
    manager.advance_one();
    assert_eq!(manager.source_offset(), FixedFrame::from_frames(2));
    assert_eq!(manager.source_pos_modulo(), 2);

    manager.advance_one();
    assert_eq!(manager.source_offset().raw(), 3 * FRAC_ONE + 1);
    assert_eq!(manager.source_pos_modulo(), 0);
}

#[test]
fn two_thirds_of_a_frame_lands_exactly_after_three_steps() {
    let mut bookkeeping = Bookkeeping::new();
    bookkeeping.set_rate_from(TimelineRate::new(2 << FRAC_BITS, 3));
    assert_eq!(bookkeeping.step_size().raw(), (2 << FRAC_BITS) / 3);
    assert_eq!(bookkeeping.step_size().raw(), 5_461);
    assert_eq!(bookkeeping.rate_modulo(), 1);
    assert_eq!(bookkeeping.denominator(), 3);

    let mut manager = manager((0, 1), &bookkeeping, (10, 0), (100, 0));
    manager.advance_one();
    assert_eq!(manager.source_offset().raw(), 5_461);
    assert_eq!(manager.source_pos_modulo(), 1);
    manager.advance_one();
    assert_eq!(manager.source_offset().raw(), 10_922);
    assert_eq!(manager.source_pos_modulo(), 2);
    manager.advance_one();
    assert_eq!(manager.source_offset().raw(), 2 << FRAC_BITS);
    assert_eq!(manager.source_pos_modulo(), 0);
    assert_eq!(manager.dest_offset(), 3);
}

#[test]
fn consumed_once_window_reaches_buffer_end() {
    let bookkeeping = Bookkeeping::new();
    let pos_width = FRAC_HALF - 1;
    let end = 4 * FRAC_ONE - pos_width;

    let before_end = manager((pos_width, FRAC_HALF), &bookkeeping, (10, 0), (4, end - 1));
    assert!(!before_end.source_is_consumed());
    assert!(before_end.frame_can_be_mixed());

    let at_end = manager((pos_width, FRAC_HALF), &bookkeeping, (10, 0), (4, end));
    assert!(at_end.source_is_consumed());
    assert!(!at_end.frame_can_be_mixed());
}

#[test]
fn update_offsets_writes_back_cursor() {
    let mut bookkeeping = bookkeeping_for(44_100, 48_000);
    let mut manager = manager((FRAC_HALF - 1, FRAC_HALF), &bookkeeping, (100, 3), (1_000, 0));
    manager.advance_to_end();

    let mut dest_offset = 0;
    let mut source_offset = FixedFrame::ZERO;
    manager.update_offsets(&mut dest_offset, &mut source_offset, &mut bookkeeping);
    assert_eq!(dest_offset, 100);
    // 97 frames of 7526 + 2/5 sub-frames.
    assert_eq!(source_offset.raw(), 97 * 7_526 + 97 * 2 / 5);
    assert_eq!(bookkeeping.source_pos_modulo(), 97 * 2 % 5);
}

#[test]
#[should_panic(expected = "dest_offset")]
fn dest_offset_must_be_inside_window() {
    let bookkeeping = Bookkeeping::new();
    manager((0, 1), &bookkeeping, (4, 4), (10, 0));
}

#[test]
#[should_panic(expected = "negative filter width")]
fn source_offset_must_reach_buffer() {
    let bookkeeping = Bookkeeping::new();
    manager((FRAC_HALF - 1, FRAC_HALF), &bookkeeping, (4, 0), (10, -FRAC_HALF));
}
