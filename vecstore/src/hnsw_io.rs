use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::VecError;
use crate::hnsw::{HNSW, HNSWConfig, HnswInner, HnswNode};

const HNSW_MAGIC: [u8; 4] = [b'H', b'N', b'S', b'W'];
const HNSW_VERSION: u32 = 2;
const NO_ENTRY: u32 = u32::MAX;
const HEADER_LEN: u64 = 36;
/// Largest vector dimension accepted from a file header.
const MAX_DIM: usize = 1 << 16;
/// Upper bound on up-front allocation driven by the header node count.
const MAX_PREALLOC: usize = 1 << 16;

/// Save serializes the HNSW index to a writer in a compact binary format:
///
/// ```text
/// [4B magic "HNSW"] [4B version=2]
/// [4B dim] [4B M] [4B efConstruction] [4B efSearch]
/// [4B numNodes] [4B maxLevel] [4B entrySlot (0xFFFFFFFF = none)]
/// For each node, in insertion order:
///   [4B label] [4B level]
///   [dim x 4B float32 vector]
///   For each layer 0..=level:
///     [4B numFriends] [numFriends x 4B friend slots]
/// ```
///
/// All multi-byte values are little-endian. Labels are opaque to the
/// format; any mapping from labels to caller data lives elsewhere.
pub fn save(h: &HNSW, w: &mut dyn Write) -> Result<(), VecError> {
    let inner = h.read_inner();
    let mut bw = BufWriter::new(w);

    // Header.
    bw.write_all(&HNSW_MAGIC)?;
    put_u32(&mut bw, HNSW_VERSION)?;

    // Config.
    put_u32(&mut bw, inner.cfg.dim as u32)?;
    put_u32(&mut bw, inner.cfg.m as u32)?;
    put_u32(&mut bw, inner.cfg.ef_construction as u32)?;
    put_u32(&mut bw, inner.cfg.ef_search as u32)?;

    // Index metadata.
    put_u32(&mut bw, inner.nodes.len() as u32)?;
    put_u32(&mut bw, inner.max_level as u32)?;
    put_u32(&mut bw, inner.entry.unwrap_or(NO_ENTRY))?;

    // Nodes.
    for nd in &inner.nodes {
        put_u32(&mut bw, nd.label)?;
        put_u32(&mut bw, nd.level as u32)?;
        for &v in &nd.vector {
            bw.write_all(&v.to_le_bytes())?;
        }
        for lev in 0..=nd.level {
            let friends = nd.friends.get(lev).map(Vec::as_slice).unwrap_or(&[]);
            put_u32(&mut bw, friends.len() as u32)?;
            for &f in friends {
                put_u32(&mut bw, f)?;
            }
        }
    }

    bw.flush()?;
    Ok(())
}

/// Load deserializes an HNSW index from a reader.
///
/// Derived state (entry point, max level, label lookup) is recomputed from
/// the node data; the header values are read but not trusted.
pub fn load(r: &mut dyn Read) -> Result<HNSW, VecError> {
    load_bounded(r, None)
}

/// Like [`load`], but rejects headers describing more nodes than `len`
/// bytes can hold.
fn load_bounded(r: &mut dyn Read, len: Option<u64>) -> Result<HNSW, VecError> {
    let mut br = BufReader::new(r);

    // Magic.
    let mut magic = [0u8; 4];
    br.read_exact(&mut magic)?;
    if magic != HNSW_MAGIC {
        return Err(VecError::InvalidFormat(format!("invalid magic {magic:?}")));
    }

    // Version.
    let version = get_u32(&mut br)?;
    if version != HNSW_VERSION {
        return Err(VecError::InvalidFormat(format!(
            "unsupported version {version} (want {HNSW_VERSION})"
        )));
    }

    // Config.
    let dim = get_u32(&mut br)? as usize;
    if dim == 0 || dim > MAX_DIM {
        return Err(VecError::InvalidFormat(format!("invalid dimension {dim}")));
    }
    let m = get_u32(&mut br)? as usize;
    let ef_construction = get_u32(&mut br)? as usize;
    let ef_search = get_u32(&mut br)? as usize;

    // Metadata: read but don't trust.
    let num_nodes = get_u32(&mut br)? as usize;
    let _file_max_level = get_u32(&mut br)?;
    let _file_entry = get_u32(&mut br)?;

    // Smallest node: label, level, vector and one empty friend list.
    if let Some(len) = len {
        let min_node = 12 + 4 * dim as u64;
        let need = HEADER_LEN.saturating_add((num_nodes as u64).saturating_mul(min_node));
        if need > len {
            return Err(VecError::InvalidFormat(format!(
                "{num_nodes} nodes of dimension {dim} need at least {need} bytes, file has {len}"
            )));
        }
    }

    let mut nodes = Vec::with_capacity(num_nodes.min(MAX_PREALLOC));
    let mut slots = HashMap::with_capacity(num_nodes.min(MAX_PREALLOC));

    for slot in 0..num_nodes {
        let label = get_u32(&mut br)?;
        if slots.insert(label, slot as u32).is_some() {
            return Err(VecError::InvalidFormat(format!("duplicate label {label}")));
        }

        let level = get_u32(&mut br)? as usize;
        if level > 31 {
            return Err(VecError::InvalidFormat(format!(
                "node level {level} exceeds maximum 31"
            )));
        }

        let mut vector = vec![0.0f32; dim];
        for v in &mut vector {
            let mut fb = [0u8; 4];
            br.read_exact(&mut fb)?;
            *v = f32::from_le_bytes(fb);
        }

        let mut friends = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let nf = get_u32(&mut br)? as usize;
            let mut layer_friends = Vec::with_capacity(nf.min(num_nodes).min(MAX_PREALLOC));
            for _ in 0..nf {
                let f_id = get_u32(&mut br)?;
                if f_id as usize >= num_nodes {
                    return Err(VecError::InvalidFormat(format!(
                        "friend slot {f_id} out of bounds (numNodes={num_nodes})"
                    )));
                }
                layer_friends.push(f_id);
            }
            friends.push(layer_friends);
        }

        nodes.push(HnswNode {
            label,
            vector,
            level,
            friends,
        });
    }

    // Recompute derived state from actual data.
    let mut entry = None;
    let mut max_level = 0;
    for (slot, nd) in nodes.iter().enumerate() {
        if entry.is_none() || nd.level > max_level {
            entry = Some(slot as u32);
            max_level = nd.level;
        }
    }

    let mut cfg = HNSWConfig {
        dim,
        m,
        ef_construction,
        ef_search,
        seed: None,
    };
    cfg.set_defaults();

    let mut inner = HnswInner::new(cfg, 0);
    inner.nodes = nodes;
    inner.slots = slots;
    inner.entry = entry;
    inner.max_level = max_level;
    Ok(HNSW::from_inner(inner))
}

/// Save the index to `path`, replacing any existing file.
///
/// Writes to a sibling temporary file first and renames it into place, so a
/// crash mid-write leaves the previous file intact.
pub fn save_file(h: &HNSW, path: &Path) -> Result<(), VecError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        save(h, &mut f)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load an index previously written by [`save_file`].
pub fn load_file(path: &Path) -> Result<HNSW, VecError> {
    let mut f = File::open(path)?;
    let len = f.metadata()?.len();
    load_bounded(&mut f, Some(len))
}

fn put_u32(w: &mut impl Write, v: u32) -> Result<(), VecError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn get_u32(r: &mut impl Read) -> Result<u32, VecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
