mod common;

use common::{BOOTLOADER, MEMCPY_INFLATE, RleCodec, ThumbAssembler, put_word, thumb_bl, thumb_movw};
use flash_patcher::{
    Codec, Delta, Dest, DeviceLayout, Error, Len, PatchOp, PatchPlan, PatchValue, RegionKind,
    Session, Window, patch_session, round_up_word,
};
use gen_image::sample::*;
use rstest::rstest;

const CURSOR: usize = 0x1000;

fn ext(offset: usize) -> u32 {
    DeviceLayout::EXTERNAL_BASE + offset as u32
}

fn int(offset: usize) -> u32 {
    DeviceLayout::INTERNAL_BASE + offset as u32
}

fn slim_plan() -> PatchPlan {
    let sprites = ext(SPRITES)..ext(SPRITES + SPRITES_LEN);
    let mut plan = PatchPlan::new();
    plan.replace(RegionKind::Internal, 0x4, PatchValue::symbol("bootloader"))
        .patch_call(RegionKind::Internal, 0x100, "memcpy_inflate")
        .patch_instruction(RegionKind::Internal, 0x104, "movw r1, #500", Some(4))
        // Graphics go to internal flash.
        .compress(RegionKind::External, TILES, TILES_LEN)
        .move_to_region(RegionKind::External, TILES, Dest::Cursor, Len::Compressed)
        .replace(RegionKind::Internal, TILES_REF, PatchValue::CursorAddress)
        .advance_cursor(Len::Compressed)
        // The song is dropped.
        .delete(SONG, SONG_LEN)
        .erase_external_refs(SONG, SONG_LEN)
        .scan_and_zero(
            RegionKind::External,
            SCENE_TABLE..SCENE_TABLE + SCENE_TABLE_LEN,
            ext(SONG)..ext(SONG + SONG_LEN),
        )
        // Everything after it slides down.
        .scan_and_adjust(
            RegionKind::External,
            SCENE_TABLE..SCENE_TABLE + SCENE_TABLE_LEN,
            sprites,
            Delta::Offset,
        )
        .move_block(RegionKind::External, SCENE_TABLE, Delta::Offset, SCENE_TABLE_LEN)
        .add(RegionKind::Internal, SCENE_TABLE_REF, Delta::Offset, 4)
        .move_block(RegionKind::External, SPRITES, Delta::Offset, SPRITES_LEN)
        .add(RegionKind::Internal, SPRITES_REF, Delta::Offset, 4)
        .fixup_external_refs(SPRITES, SPRITES_LEN, Delta::Offset)
        .move_block(RegionKind::External, SETTINGS, Delta::Offset, 0x2000)
        .round_offset_to_page()
        .patch_instruction(RegionKind::Internal, 0x108, ".word {offset+0x1f000}", Some(4))
        .shorten(Delta::Offset);
    plan
}

fn session(internal: Vec<u8>, external: Vec<u8>) -> Session<ThumbAssembler, flash_patcher::SymbolMap, RleCodec> {
    Session::builder(internal, external)
        .cursor(CURSOR)
        .pointer_window(RWDATA..RWDATA + RWDATA_LEN)
        .assembler(ThumbAssembler)
        .symbols(common::symbols())
        .codec(RleCodec)
        .build()
        .unwrap()
}

/// The same edits, written out by hand on plain vectors.
fn expected(mut internal: Vec<u8>, mut external: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    let offset = -(SONG_LEN as i64);
    let shift = |value: usize| (value as i64 + offset) as usize;

    put_word(&mut internal, 0x4, BOOTLOADER);
    internal[0x100..0x104].copy_from_slice(&thumb_bl(int(0x100), MEMCPY_INFLATE).unwrap());
    internal[0x104..0x108].copy_from_slice(&thumb_movw(1, 500));

    let packed = RleCodec.compress(&external[TILES..TILES + TILES_LEN]).unwrap();
    external[TILES..TILES + packed.len()].copy_from_slice(&packed);
    external[TILES + packed.len()..TILES + TILES_LEN].fill(0);
    internal[CURSOR..CURSOR + packed.len()].copy_from_slice(&packed);
    put_word(&mut internal, TILES_REF, int(CURSOR));

    external[SONG..SONG + SONG_LEN].fill(0);
    put_word(&mut internal, RWDATA, 0);
    put_word(&mut external, SCENE_TABLE + 12, 0);
    put_word(&mut external, SCENE_TABLE + 4, ext(shift(SPRITES)));
    put_word(&mut external, SCENE_TABLE + 8, ext(shift(SPRITES + 0x800)));

    external.copy_within(SCENE_TABLE..SCENE_TABLE + SCENE_TABLE_LEN, shift(SCENE_TABLE));
    put_word(&mut internal, SCENE_TABLE_REF, ext(shift(SCENE_TABLE)));
    external.copy_within(SPRITES..SPRITES + SPRITES_LEN, shift(SPRITES));
    put_word(&mut internal, SPRITES_REF, ext(shift(SPRITES)));
    put_word(&mut internal, RWDATA + 4, ext(shift(SPRITES + 0x10)));
    external.copy_within(SETTINGS..SETTINGS + 0x2000, shift(SETTINGS));
    put_word(&mut internal, 0x108, shift(0x1f000) as u32);
    external.truncate(EXTERNAL_LEN - SONG_LEN);
    (internal, external)
}

#[rstest]
fn slim_plan_matches_hand_built_images() {
    common::init_logger();
    let images = writer().build().unwrap();
    let (internal, external) = expected(images.internal.clone(), images.external.clone());

    let mut session = session(images.internal, images.external);
    let plan = slim_plan();
    let report = plan.execute(&mut session).unwrap();

    assert_eq!(report.applied, plan.len());
    assert_eq!(report.offset, -(SONG_LEN as i64));
    assert_eq!(report.pointers_zeroed, 2);
    assert_eq!(report.pointers_adjusted, 3);
    assert_eq!(report.bytes_removed, SONG_LEN);
    let packed_len = session.last_compressed().unwrap();
    assert_eq!(report.cursor, CURSOR + round_up_word(packed_len));

    let images = session.into_images();
    assert_eq!(images.internal, internal);
    assert_eq!(images.external, external);
}

#[rstest]
fn plan_is_plain_data() {
    let plan = slim_plan();
    let rebuilt: PatchPlan = plan.ops().iter().cloned().collect();
    assert_eq!(rebuilt, plan);
    assert!(matches!(plan.ops().last(), Some(PatchOp::Shorten(Delta::Offset))));
}

#[rstest]
fn session_from_files() {
    let dir = common::scratch_dir("session_from_files");
    let images = writer().write_files(&dir).unwrap();
    let internal = dir.join("internal.bin");
    let external = dir.join("external.bin");

    let session = patch_session!(internal.to_str().unwrap(), external.to_str().unwrap()).unwrap();
    assert_eq!(session.internal().as_bytes(), &images.internal[..]);
    assert_eq!(session.external().as_bytes(), &images.external[..]);
    assert!(!session.is_extended());

    let session = patch_session!(&images.internal, &images.external, extended: true).unwrap();
    assert!(session.is_extended());
    assert_eq!(session.internal_ceiling(), DeviceLayout::INTERNAL_EXTENDED_SIZE);

    let missing = dir.join("missing.bin");
    let err = patch_session!(missing.to_str().unwrap(), external.to_str().unwrap())
        .err()
        .unwrap();
    assert!(matches!(err, Error::Io { .. }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[rstest]
fn failing_step_is_reported_and_leaves_its_region_alone() {
    let images = writer().build().unwrap();
    let mut session = session(images.internal, images.external.clone());
    let mut plan = PatchPlan::new();
    plan.delete(SONG, SONG_LEN)
        // Moving sprites past the external ceiling.
        .move_block(RegionKind::External, SPRITES, Delta::Fixed(0x10_0000), SPRITES_LEN)
        .add(RegionKind::Internal, SPRITES_REF, Delta::Offset, 4);
    let err = plan.execute(&mut session).unwrap_err();
    assert!(matches!(err, Error::Plan { index: 1, .. }));
    assert!(matches!(err.root(), Error::CapacityExceeded { .. }));
    assert_eq!(
        session.external().read(SPRITES, SPRITES_LEN).unwrap(),
        &images.external[SPRITES..SPRITES + SPRITES_LEN]
    );
    assert_eq!(session.internal().read_u32(SPRITES_REF).unwrap(), ext(SPRITES));
}

#[rstest]
#[case::after_shorten(PatchOp::AdvanceOffset(-4))]
#[case::replace_after_shorten(PatchOp::Replace {
    region: RegionKind::Internal,
    address: 0,
    value: PatchValue::word(0),
})]
#[case::scan_after_shorten(PatchOp::ScanAndZero {
    region: RegionKind::Internal,
    window: Window::Pointers,
    values: 0..1,
})]
fn nothing_runs_after_shorten(#[case] op: PatchOp) {
    let images = writer().build().unwrap();
    let mut session = session(images.internal, images.external);
    let mut plan = PatchPlan::new();
    plan.delete(SONG, SONG_LEN).shorten(Delta::Offset).push(op);
    let err = plan.execute(&mut session).unwrap_err();
    assert!(matches!(err, Error::Plan { index: 2, .. }));
    assert!(matches!(err.root(), Error::OrderViolation { .. }));
}

#[rstest]
fn compressed_length_needs_a_compression() {
    let images = writer().build().unwrap();
    let mut session = session(images.internal, images.external);
    let mut plan = PatchPlan::new();
    plan.move_to_region(RegionKind::External, TILES, Dest::Cursor, Len::Compressed);
    let err = plan.execute(&mut session).unwrap_err();
    assert!(matches!(err.root(), Error::OrderViolation { .. }));
    assert_eq!(session.cursor(), CURSOR);
}

#[rstest]
fn blocks_move_between_banks_at_fixed_offsets() {
    let images = writer().build().unwrap();
    let mut session = session(images.internal.clone(), images.external.clone());
    let mut plan = PatchPlan::new();
    plan.move_to_region(
        RegionKind::External,
        PALETTE,
        Dest::At(0x3800),
        Len::Fixed(PALETTE_LEN),
    )
    .move_to_region(
        RegionKind::Internal,
        0,
        Dest::At(EXTERNAL_LEN),
        Len::Fixed(0x100),
    );
    let report = plan.execute(&mut session).unwrap();

    assert_eq!(report.cursor, CURSOR);
    assert_eq!(
        session.internal().read(0x3800, PALETTE_LEN).unwrap(),
        &images.external[PALETTE..PALETTE + PALETTE_LEN]
    );
    assert_eq!(session.external().len(), EXTERNAL_LEN + 0x100);
    assert_eq!(
        session.external().read(EXTERNAL_LEN, 0x100).unwrap(),
        &images.internal[..0x100]
    );
    assert_eq!(session.internal().len(), INTERNAL_LEN);
}

#[rstest]
#[case::move_far_forward(PatchOp::Move {
    region: RegionKind::External,
    address: 0x10,
    delta: Delta::Fixed(i64::MAX),
    size: Len::Fixed(4),
})]
#[case::adjust_past_the_address_space(PatchOp::ScanAndAdjust {
    region: RegionKind::Internal,
    window: Window::Pointers,
    values: ext(0)..ext(EXTERNAL_LEN),
    delta: Delta::Fixed(i64::MAX),
})]
#[case::shorten_by_everything(PatchOp::Shorten(Delta::Fixed(i64::MIN)))]
fn extreme_operands_fail_cleanly(#[case] op: PatchOp) {
    let images = writer().build().unwrap();
    let mut session = session(images.internal.clone(), images.external.clone());
    let mut plan = PatchPlan::new();
    plan.push(op);
    let err = plan.execute(&mut session).unwrap_err();
    assert!(matches!(err, Error::Plan { index: 0, .. }));
    assert!(!matches!(err.root(), Error::OrderViolation { .. }));
    assert!(!session.is_sealed());

    let after = session.into_images();
    assert_eq!(after.internal, images.internal);
    assert_eq!(after.external, images.external);
}

#[rstest]
fn instruction_slots_are_enforced_only_when_given() {
    let images = writer().build().unwrap();
    let mut session = session(images.internal.clone(), images.external);
    let mut plan = PatchPlan::new();
    plan.patch_instruction(RegionKind::Internal, 0x104, "movw r1, #500", Some(2));
    let err = plan.execute(&mut session).unwrap_err();
    assert!(matches!(err.root(), Error::Encoding { .. }));
    assert_eq!(
        session.internal().read(0x104, 4).unwrap(),
        &images.internal[0x104..0x108]
    );

    let mut plan = PatchPlan::new();
    plan.patch_instruction(RegionKind::Internal, 0x104, "movw r1, #500", None);
    plan.execute(&mut session).unwrap();
    assert_eq!(
        session.internal().read(0x104, 4).unwrap(),
        &thumb_movw(1, 500)
    );
}
