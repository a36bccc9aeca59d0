//! Fake external tools written as small `sh` scripts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable script named `name` into `dir`
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// ffprobe reporting one video stream at `rate`, plus an audio stream
pub fn fake_ffprobe(dir: &Path, rate: &str) -> PathBuf {
    let body = format!(
        r#"if [ "$1" = "-version" ]; then echo "ffprobe version 6.1.1 Copyright (c) 2007-2023"; exit 0; fi
cat <<'JSON'
{{"streams":[{{"codec_type":"video","r_frame_rate":"{rate}","avg_frame_rate":"{rate}"}},{{"codec_type":"audio"}}],"format":{{"duration":"1.0"}}}}
JSON"#,
        rate = rate
    );
    fake_tool(dir, "ffprobe", &body)
}

/// ffmpeg writing `frames` numbered images when the last argument is a frame
/// pattern, and an empty artifact otherwise
pub fn fake_ffmpeg(dir: &Path, frames: u32) -> PathBuf {
    let body = format!(
        r#"if [ "$1" = "-version" ]; then echo "ffmpeg version 6.1.1 Copyright (c) 2000-2023"; exit 0; fi
for last; do :; done
echo "frame=    1 fps=0.0 q=-0.0 size=N/A" >&2
case "$last" in
  *%08d.png)
    out=$(dirname "$last")
    i=1
    while [ $i -le {frames} ]; do
      : > "$out/$(printf %08d $i).png"
      i=$((i+1))
    done
    ;;
  *)
    : > "$last"
    ;;
esac"#,
        frames = frames
    );
    fake_tool(dir, "ffmpeg", &body)
}

/// rife writing `-n` frames into `-o`
pub fn fake_rife(dir: &Path) -> PathBuf {
    let body = r#"while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -n) n="$2"; shift ;;
  esac
  shift
done
i=1
while [ $i -le "$n" ]; do
  : > "$out/$(printf %08d $i).png"
  i=$((i+1))
done
echo "interpolated $n frames" >&2"#;
    fake_tool(dir, "rife-ncnn-vulkan", body)
}

/// realesrgan copying every frame from `-i` to `-o`
pub fn fake_realesrgan(dir: &Path) -> PathBuf {
    let body = r#"while [ $# -gt 0 ]; do
  case "$1" in
    -i) in="$2"; shift ;;
    -o) out="$2"; shift ;;
  esac
  shift
done
cp "$in"/*.png "$out"/
echo "100.00%" >&2"#;
    fake_tool(dir, "realesrgan-ncnn-vulkan", body)
}

/// A tool that prints a message and exits with `code`
pub fn failing_tool(dir: &Path, name: &str, code: i32) -> PathBuf {
    fake_tool(dir, name, &format!("echo \"boom\" >&2\nexit {}", code))
}
