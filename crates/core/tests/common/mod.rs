//! Shared fixtures for devpush-core integration tests

#![allow(dead_code)]

use devpush_core::devfile::Devfile;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Node.js component with build, run and debug commands, two preStart
/// entries (one of them a composite), a postStart command and a cache volume
pub const NODE_DEVFILE: &str = r#"
schemaVersion: 2.0.0
metadata:
  name: nodejs-web
projects:
  - name: web
    clonePath: app
components:
  - name: runtime
    container:
      image: registry.access.redhat.com/ubi8/nodejs-16
      memoryLimit: 1024Mi
      env:
        - name: NODE_ENV
          value: development
      endpoints:
        - name: http
          targetPort: 3000
        - name: debug
          targetPort: 5858
          exposure: none
      volumeMounts:
        - name: npm-cache
          path: /opt/app-root/src/.npm
  - name: npm-cache
    volume:
      size: 2Gi
commands:
  - id: install
    exec:
      component: runtime
      commandLine: npm install
      workingDir: /projects/app
      group:
        kind: build
        isDefault: true
  - id: run
    exec:
      component: runtime
      commandLine: npm start
      workingDir: /projects/app
      group:
        kind: run
        isDefault: true
  - id: debug
    exec:
      component: runtime
      commandLine: npm run debug
      workingDir: /projects/app
      env:
        - name: DEBUG
          value: "app:*"
      group:
        kind: debug
        isDefault: true
  - id: fetch-config
    exec:
      component: runtime
      commandLine: curl -sf http://config/app.json -o /tmp/app.json
  - id: warm-a
    exec:
      component: runtime
      commandLine: echo a
  - id: warm-b
    exec:
      component: runtime
      commandLine: echo b
  - id: warm
    composite:
      commands: [warm-a, warm-b]
  - id: announce
    exec:
      component: runtime
      commandLine: echo started
events:
  preStart: [fetch-config, warm]
  postStart: [announce]
"#;

pub fn node_devfile() -> Devfile {
    Devfile::from_yaml_str(NODE_DEVFILE).expect("fixture devfile parses")
}

/// Write `content` as `devfile.yaml` in a fresh temp dir
pub fn write_devfile(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("devfile.yaml");
    fs::write(&path, content).expect("write devfile");
    (dir, path)
}
