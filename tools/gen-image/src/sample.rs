//! A small two-bank firmware with the shapes real patch plans deal with: a
//! compressible graphics block, a block referenced from read/write data, a
//! large block to delete, a pointer table in external flash and two settings
//! pages at the very end.
use crate::{Bank, BlockDesc, ImageWriter, ImageWriterConfig, PointerDesc};

pub const INTERNAL_LEN: usize = 0x4000;
pub const EXTERNAL_LEN: usize = 0x2_0000;

/// Start of the internal read/write data initializer.
pub const RWDATA: usize = 0x3000;
pub const RWDATA_LEN: usize = 0x100;

/// 7772 bytes of runs.
pub const TILES: usize = 0x0000;
pub const TILES_LEN: usize = 7772;
pub const PALETTE: usize = 0x2000;
pub const PALETTE_LEN: usize = 0x400;
pub const SONG: usize = 0x3000;
pub const SONG_LEN: usize = 0x8000;
pub const SCENE_TABLE: usize = 0xb000;
pub const SCENE_TABLE_LEN: usize = 0x10;
pub const SPRITES: usize = 0xc000;
pub const SPRITES_LEN: usize = 0x1000;
pub const SETTINGS: usize = 0x1_e000;
pub const SETTINGS_LEN: usize = 0x50;

/// Internal pointer slots.
pub const PALETTE_REF: usize = 0x20;
pub const SPRITES_REF: usize = 0x24;
pub const SCENE_TABLE_REF: usize = 0x28;
pub const TILES_REF: usize = 0x2c;

pub fn writer() -> ImageWriter {
    let mut writer = ImageWriter::new(ImageWriterConfig {
        internal_len: INTERNAL_LEN,
        external_len: EXTERNAL_LEN,
        ..Default::default()
    });
    writer
        .block(BlockDesc::pattern("code", Bank::Internal, 0, 0x1000, 0x6b52))
        .block(BlockDesc::zero("rwdata", Bank::Internal, RWDATA, RWDATA_LEN))
        .block(BlockDesc::runs("tiles", Bank::External, TILES, TILES_LEN, 0x5a))
        .block(BlockDesc::pattern("palette", Bank::External, PALETTE, PALETTE_LEN, 1))
        .block(BlockDesc::pattern("song", Bank::External, SONG, SONG_LEN, 2))
        .block(BlockDesc::zero("scene_table", Bank::External, SCENE_TABLE, SCENE_TABLE_LEN))
        .block(BlockDesc::pattern("sprites", Bank::External, SPRITES, SPRITES_LEN, 3))
        .block(BlockDesc::pattern("settings0", Bank::External, SETTINGS, SETTINGS_LEN, 4))
        .block(BlockDesc::pattern(
            "settings1",
            Bank::External,
            SETTINGS + 0x1000,
            SETTINGS_LEN,
            5,
        ))
        .pointer(PointerDesc::to_external(PALETTE_REF, PALETTE))
        .pointer(PointerDesc::to_external(SPRITES_REF, SPRITES))
        .pointer(PointerDesc::to_external(SCENE_TABLE_REF, SCENE_TABLE))
        .pointer(PointerDesc::to_external(TILES_REF, TILES))
        .pointer(PointerDesc::to_external(RWDATA, SONG))
        .pointer(PointerDesc::to_external(RWDATA + 4, SPRITES + 0x10))
        .pointer(PointerDesc::to_external(RWDATA + 8, PALETTE + 0x100))
        .pointer(PointerDesc::external_table(SCENE_TABLE, PALETTE))
        .pointer(PointerDesc::external_table(SCENE_TABLE + 4, SPRITES))
        .pointer(PointerDesc::external_table(SCENE_TABLE + 8, SPRITES + 0x800))
        .pointer(PointerDesc::external_table(SCENE_TABLE + 12, SONG));
    writer
}
