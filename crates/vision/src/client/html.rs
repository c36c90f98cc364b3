/// Control page served at `/`.
pub(crate) const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Webcam Object Detection</title>
<style>
  body { margin: 0; font-family: system-ui, sans-serif; background: #111; color: #eee; }
  header { display: flex; align-items: center; gap: 1rem; padding: 0.75rem 1rem; background: #1d1d1d; }
  header h1 { font-size: 1.1rem; margin: 0; flex: 1; }
  #status.ready { color: #6fdc6f; }
  #stage { position: relative; background: #000; text-align: center; }
  #stage img { max-width: 100%; max-height: 80vh; }
  #fps { position: absolute; top: 0.5rem; left: 0.5rem; background: rgba(0,0,0,0.6); padding: 0.2rem 0.5rem; border-radius: 4px; }
  #alert { display: none; background: #7a1f1f; padding: 0.75rem 1rem; }
  .controls { display: flex; gap: 0.5rem; padding: 0.75rem 1rem; }
  button { padding: 0.5rem 1rem; border: 0; border-radius: 4px; background: #2d6cdf; color: #fff; cursor: pointer; }
  button:disabled { background: #444; color: #888; cursor: default; }
  table { border-collapse: collapse; margin: 0 1rem 1rem; min-width: 16rem; }
  td, th { padding: 0.3rem 0.75rem; border-bottom: 1px solid #333; text-align: left; }
</style>
</head>
<body>
<header>
  <h1>Webcam Object Detection</h1>
  <span id="status">Loading…</span>
</header>
<div id="alert"></div>
<div id="stage">
  <img id="output" src="/stream.mjpg" alt="processed stream">
  <span id="fps"></span>
</div>
<div class="controls">
  <button id="start" disabled>Start</button>
  <button id="stop" disabled>Stop</button>
  <button id="flip" disabled>Flip camera</button>
  <button id="fullscreen">Expand</button>
</div>
<table>
  <thead><tr><th>Object</th><th>Count</th></tr></thead>
  <tbody id="detections"></tbody>
</table>
<script>
const post = (path, body) => fetch(path, {
  method: "POST",
  headers: body ? { "Content-Type": "application/json" } : {},
  body: body ? JSON.stringify(body) : undefined,
});

for (const name of ["start", "stop", "flip", "fullscreen"]) {
  document.getElementById(name).addEventListener("click", () => post(`/control/${name}`));
}

document.addEventListener("visibilitychange", () => {
  post("/visibility", { hidden: document.hidden });
});

let lastAlert = null;
let lastIcon = "expand";

function applyFullscreen(icon) {
  if (icon === lastIcon) return;
  lastIcon = icon;
  const stage = document.getElementById("stage");
  if (icon === "compress" && !document.fullscreenElement) {
    stage.requestFullscreen().catch((err) => console.error("Error attempting to enable full-screen mode:", err));
  } else if (icon === "expand" && document.fullscreenElement) {
    document.exitFullscreen();
  }
}

async function refresh() {
  try {
    const state = await (await fetch("/state")).json();
    const status = document.getElementById("status");
    status.textContent = state.model_status;
    status.className = state.model_status === "Ready" ? "ready" : "";
    document.getElementById("start").disabled = !state.controls.start;
    document.getElementById("stop").disabled = !state.controls.stop;
    document.getElementById("flip").disabled = !state.controls.flip;
    document.getElementById("fps").textContent = state.fps || "";
    document.getElementById("fullscreen").textContent = state.fullscreen_icon === "compress" ? "Compress" : "Expand";
    applyFullscreen(state.fullscreen_icon);

    const alertBox = document.getElementById("alert");
    if (state.alert && state.alert !== lastAlert) {
      alertBox.textContent = state.alert;
      alertBox.style.display = "block";
    }
    lastAlert = state.alert;

    const body = document.getElementById("detections");
    body.replaceChildren(...state.detections.map(({ label, count }) => {
      const row = document.createElement("tr");
      for (const value of [label, count]) {
        const cell = document.createElement("td");
        cell.textContent = value;
        row.appendChild(cell);
      }
      return row;
    }));
  } catch (err) {
    console.error("state refresh failed", err);
  }
}

setInterval(refresh, 250);
refresh();
</script>
</body>
</html>
"#;
