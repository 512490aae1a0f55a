// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: wires persistent storage, configuration and seed data
// around the custody engine for the terminal front end.

pub mod app_services;
pub mod data_dir;
pub mod seed;
